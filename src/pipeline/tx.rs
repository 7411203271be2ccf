//! Capture direction: device frames to egress packets

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crate::audio::buffer::{AudioFrame, AudioMsg, FrameTopic, SharedFramePool, SharedRingBuffer};
use crate::audio::capture::{AudioCapture, Framer};
use crate::audio::convert::{remix, FormatConverter};
use crate::audio::resample::RateConverter;
use crate::codec::{build_encoder, FrameEncoder};
use crate::constants::WORKER_POLL_INTERVAL;
use crate::error::{AudioError, Result};
use crate::events::Subscription;
use crate::params::{Channels, Direction, PipelineParameters};

/// Counters for the capture direction
#[derive(Debug, Default)]
pub struct TxCounters {
    pub frames_captured: AtomicU64,
    pub frames_encoded: AtomicU64,
    /// Wire frames the encoder rejected
    pub encode_errors: AtomicU64,
    /// Device frames that could not be converted at all
    pub conversion_errors: AtomicU64,
    /// Packets rejected because the egress queue was full
    pub egress_dropped: AtomicU64,
}

/// One converted frame, fanned out to the monitoring tap and the wire
#[derive(Debug, Clone, PartialEq)]
pub struct TxOutput {
    pub loopback: AudioMsg,
    pub egress: AudioMsg,
}

/// Conversion chain from device frames to wire payloads.
///
/// Device audio is remixed to the wire channel layout, resampled to the
/// wire rate, cut into wire frames, quantized and encoded.
pub struct TxStage {
    device_channels: Channels,
    wire_channels: Channels,
    resampler: RateConverter,
    framer: Framer,
    converter: FormatConverter,
    encoder: Box<dyn FrameEncoder>,
    sequence: u32,
    encode_errors: u64,
}

impl TxStage {
    pub fn new(params: &PipelineParameters) -> Result<Self> {
        Self::with_encoder(params, build_encoder(params)?)
    }

    /// Build the chain around an already constructed encoder
    pub fn with_encoder(params: &PipelineParameters, encoder: Box<dyn FrameEncoder>) -> Result<Self> {
        let wire_channels = params.wire_channels();
        let converter = FormatConverter::new(params.bit_depth()).ok_or_else(|| {
            AudioError::UnsupportedFormat(format!("{} bit samples", params.bit_depth()))
        })?;

        Ok(Self {
            device_channels: params.input.channels,
            wire_channels,
            resampler: RateConverter::new(
                params.input.sample_rate,
                params.wire_rate(),
                wire_channels,
                params.resample_quality(),
                params.frame_length,
            )?,
            framer: Framer::new(wire_frame_length(params) * wire_channels.count() as usize),
            converter,
            encoder,
            sequence: 0,
            encode_errors: 0,
        })
    }

    /// Run one device frame through the chain. A frame may yield zero or
    /// more wire frames while the resampler fills up.
    ///
    /// A wire frame the encoder rejects is counted and skipped; its
    /// sequence number stays used so the receiver sees the gap.
    pub fn process(&mut self, frame: &AudioFrame) -> Result<Vec<TxOutput>> {
        let remixed = remix(&frame.samples, self.device_channels, self.wire_channels);
        let resampled = self.resampler.process(&remixed)?;

        let converter = self.converter;
        let mut wire_frames = Vec::new();
        self.framer.push(&resampled, |samples| {
            let mut quantized = Vec::with_capacity(samples.len());
            converter.quantize(samples, &mut quantized);
            wire_frames.push(quantized);
        });

        let mut outputs = Vec::with_capacity(wire_frames.len());
        for quantized in wire_frames {
            let sequence = self.sequence;
            self.sequence = self.sequence.wrapping_add(1);

            let payload = match self.encoder.encode(&quantized) {
                Ok(payload) => payload,
                Err(e) => {
                    self.encode_errors += 1;
                    tracing::warn!("Skipping wire frame {}: {}", sequence, e);
                    continue;
                }
            };

            outputs.push(TxOutput {
                loopback: AudioMsg::raw(FrameTopic::Loopback, sequence, quantized),
                egress: AudioMsg::encoded(FrameTopic::Capture, sequence, payload),
            });
        }
        Ok(outputs)
    }

    pub fn encode_errors(&self) -> u64 {
        self.encode_errors
    }
}

/// Wire frames cover the same duration as one device frame
pub(crate) fn wire_frame_length(params: &PipelineParameters) -> usize {
    ((params.frame_length as f64 * params.wire_rate() / params.input.sample_rate).round() as usize)
        .max(1)
}

/// Queues the capture worker reads from and writes to
pub(crate) struct TxQueues {
    pub capture: SharedRingBuffer<AudioFrame>,
    /// Buffers lent to the capture callback, returned once processed
    pub pool: SharedFramePool,
    pub egress: SharedRingBuffer<AudioMsg>,
    pub loopback: SharedRingBuffer<AudioMsg>,
}

/// Drain the capture queue through `stage` until shutdown.
///
/// The worker owns the capture so the device is released when it returns.
pub(crate) fn run(
    mut capture: AudioCapture,
    mut stage: TxStage,
    queues: TxQueues,
    shutdown: Subscription,
    running: Arc<AtomicBool>,
    counters: Arc<TxCounters>,
) {
    tracing::info!("Capture worker started");

    while running.load(Ordering::Relaxed) && !shutdown.shutdown_requested(Direction::Input) {
        while let Some(frame) = queues.capture.try_pop() {
            counters.frames_captured.fetch_add(1, Ordering::Relaxed);
            match stage.process(&frame) {
                Ok(outputs) => {
                    for output in outputs {
                        counters.frames_encoded.fetch_add(1, Ordering::Relaxed);
                        queues.loopback.push_overwrite(output.loopback);
                        if !queues.egress.push(output.egress) {
                            counters.egress_dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                Err(e) => {
                    counters.conversion_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Dropping captured frame {}: {}", frame.sequence, e);
                }
            }
            counters
                .encode_errors
                .store(stage.encode_errors(), Ordering::Relaxed);
            queues.pool.give(frame.samples);
        }
        thread::sleep(WORKER_POLL_INTERVAL);
    }

    capture.stop();
    let mut discarded = 0;
    while let Some(frame) = queues.capture.try_pop() {
        queues.pool.give(frame.samples);
        discarded += 1;
    }
    tracing::info!(
        "Capture worker stopped ({} frames captured, {} dropped, {} discarded)",
        capture.frames_captured(),
        capture.frames_dropped(),
        discarded
    );
}
