//! Render direction: ingress packets to device frames

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crate::audio::buffer::{AudioFrame, AudioMsg, Payload, SharedFramePool, SharedRingBuffer};
use crate::audio::convert::{remix, FormatConverter};
use crate::audio::playback::AudioPlayback;
use crate::audio::resample::RateConverter;
use crate::codec::{build_decoder, FrameDecoder};
use crate::constants::WORKER_POLL_INTERVAL;
use crate::error::{AudioError, Result};
use crate::events::Subscription;
use crate::params::{Channels, Direction, PipelineParameters};

/// Longest run of lost packets that is filled with concealed audio
const MAX_CONCEALED_FRAMES: u32 = 3;

#[derive(Debug, Default)]
pub struct RxCounters {
    pub frames_received: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub frames_concealed: AtomicU64,
    pub decode_errors: AtomicU64,
    pub frames_rendered: AtomicU64,
}

/// Conversion chain from wire payloads to device frames
pub struct RxStage {
    decoder: Box<dyn FrameDecoder>,
    converter: FormatConverter,
    wire_channels: Channels,
    device_channels: Channels,
    resampler: RateConverter,
    sequence: u32,
    expected: Option<u32>,
    frames_concealed: u64,
}

impl RxStage {
    pub fn new(params: &PipelineParameters) -> Result<Self> {
        let converter = FormatConverter::new(params.bit_depth()).ok_or_else(|| {
            AudioError::UnsupportedFormat(format!("{} bit samples", params.bit_depth()))
        })?;

        Ok(Self {
            decoder: build_decoder(params)?,
            converter,
            wire_channels: params.wire_channels(),
            device_channels: params.output.channels,
            resampler: RateConverter::new(
                params.wire_rate(),
                params.output.sample_rate,
                params.output.channels,
                params.resample_quality(),
                super::tx::wire_frame_length(params),
            )?,
            sequence: 0,
            expected: None,
            frames_concealed: 0,
        })
    }

    /// Turn one received message into device audio.
    ///
    /// Raw payloads skip the decoder. A short gap in encoded sequence
    /// numbers is filled with concealed frames ahead of the new one when
    /// the codec supports it. Returns `None` while the resampler is still
    /// collecting input.
    pub fn process(&mut self, msg: &AudioMsg) -> Result<Option<AudioFrame>> {
        let mut wire = Vec::new();
        let samples = match &msg.payload {
            Payload::Raw(samples) => samples.as_slice(),
            Payload::Encoded(bytes) => {
                self.conceal_gap(msg.sequence, &mut wire)?;
                let decoded = self.decoder.decode(bytes)?;
                if wire.is_empty() {
                    wire = decoded;
                } else {
                    wire.extend_from_slice(&decoded);
                }
                wire.as_slice()
            }
        };

        let mut floats = Vec::with_capacity(samples.len());
        self.converter.dequantize(samples, &mut floats);
        let remixed = remix(&floats, self.wire_channels, self.device_channels);
        let resampled = self.resampler.process(&remixed)?;

        if resampled.is_empty() {
            return Ok(None);
        }
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(AudioFrame::new(
            resampled,
            self.device_channels.count(),
            sequence,
        )))
    }

    fn conceal_gap(&mut self, sequence: u32, out: &mut Vec<i32>) -> Result<()> {
        let missing = self.expected.map_or(0, |e| sequence.wrapping_sub(e));
        self.expected = Some(sequence.wrapping_add(1));
        if missing == 0 || missing > MAX_CONCEALED_FRAMES {
            return Ok(());
        }

        for _ in 0..missing {
            match self.decoder.conceal()? {
                Some(frame) => {
                    out.extend_from_slice(&frame);
                    self.frames_concealed += 1;
                }
                None => break,
            }
        }
        Ok(())
    }

    pub fn frames_concealed(&self) -> u64 {
        self.frames_concealed
    }
}

pub(crate) struct RxQueues {
    pub ingress: SharedRingBuffer<AudioMsg>,
    pub render: SharedRingBuffer<AudioFrame>,
    /// Buffers the playback callback returns once a frame is played
    pub pool: SharedFramePool,
}

/// Feed the render queue from ingress until shutdown.
///
/// Rendered frames overwrite the oldest queued ones so the device always
/// plays the most recent audio.
pub(crate) fn run(
    mut playback: AudioPlayback,
    mut stage: RxStage,
    queues: RxQueues,
    shutdown: Subscription,
    running: Arc<AtomicBool>,
    counters: Arc<RxCounters>,
) {
    tracing::info!("Render worker started");

    while running.load(Ordering::Relaxed) && !shutdown.shutdown_requested(Direction::Output) {
        while let Some(msg) = queues.ingress.try_pop() {
            counters.frames_received.fetch_add(1, Ordering::Relaxed);
            match stage.process(&msg) {
                Ok(Some(frame)) => {
                    counters.frames_decoded.fetch_add(1, Ordering::Relaxed);
                    let pooled = AudioFrame::new(
                        queues.pool.fill(&frame.samples),
                        frame.channels,
                        frame.sequence,
                    );
                    if let Some(evicted) = queues.render.push_overwrite(pooled) {
                        queues.pool.give(evicted.samples);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Dropping received frame {}: {}", msg.sequence, e);
                }
            }
            counters
                .frames_concealed
                .store(stage.frames_concealed(), Ordering::Relaxed);
        }
        counters
            .frames_rendered
            .store(playback.frames_rendered(), Ordering::Relaxed);
        thread::sleep(WORKER_POLL_INTERVAL);
    }

    playback.stop();
    let mut discarded = 0;
    while let Some(frame) = queues.render.try_pop() {
        queues.pool.give(frame.samples);
        discarded += 1;
    }
    tracing::info!(
        "Render worker stopped ({} frames rendered, {} silence insertions, {} discarded)",
        playback.frames_rendered(),
        playback.silence_inserted(),
        discarded
    );
}
