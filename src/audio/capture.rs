//! Audio capture from the input device
//!
//! The device callback only slices incoming samples into fixed-size frames,
//! copies each into a buffer taken from the frame pool and pushes it into a
//! bounded ring buffer. It never blocks or allocates: when no buffer is free
//! or the ring is full the newest frame is dropped and counted.

use cpal::traits::DeviceTrait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::audio::buffer::{AudioFrame, SharedFramePool, SharedRingBuffer};
use crate::audio::device::find_device;
use crate::audio::stream::{build_and_play, spawn_stream_thread};
use crate::error::AudioError;
use crate::events::{Event, EventBus, ShutdownScope};
use crate::params::{Direction, StreamConfig};

/// State shared between the capture handle and its device callback
#[derive(Clone)]
struct CaptureContext {
    running: Arc<AtomicBool>,
    output_buffer: SharedRingBuffer<AudioFrame>,
    pool: SharedFramePool,
    sequence: Arc<AtomicU32>,
    samples_captured: Arc<AtomicU64>,
    stream_errors: Arc<AtomicU64>,
    bus: EventBus,
}

/// Audio capture instance for the input device
pub struct AudioCapture {
    config: StreamConfig,
    ctx: CaptureContext,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioCapture {
    /// Create a capture for `config`; the device is opened by [`start`](Self::start).
    ///
    /// Frames are carried in buffers from `pool`; the consumer of
    /// `output_buffer` hands them back once processed.
    pub fn new(
        config: StreamConfig,
        output_buffer: SharedRingBuffer<AudioFrame>,
        pool: SharedFramePool,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            ctx: CaptureContext {
                running: Arc::new(AtomicBool::new(false)),
                output_buffer,
                pool,
                sequence: Arc::new(AtomicU32::new(0)),
                samples_captured: Arc::new(AtomicU64::new(0)),
                stream_errors: Arc::new(AtomicU64::new(0)),
                bus,
            },
            thread_handle: None,
        }
    }

    /// Open the device and start capturing audio
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.is_running() {
            return Ok(());
        }

        self.ctx.sequence.store(0, Ordering::SeqCst);
        self.ctx.samples_captured.store(0, Ordering::SeqCst);
        self.ctx.running.store(true, Ordering::SeqCst);

        let config = self.config.clone();
        let ctx = self.ctx.clone();
        let result = spawn_stream_thread(
            "capture".to_string(),
            self.ctx.running.clone(),
            move || {
                let device = find_device(&config.device_name, Direction::Input)?;
                let name = device.name.clone();
                let device = device.into_inner();
                build_and_play(&name, &config, |cpal_config| {
                    build_input_stream(&device, cpal_config, &config, ctx.clone())
                })
            },
        );

        match result {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                self.ctx.bus.publish(Event::StreamActive {
                    direction: Direction::Input,
                    active: true,
                });
                Ok(())
            }
            Err(e) => {
                self.ctx.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Stop capturing and release the device
    pub fn stop(&mut self) {
        self.ctx.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Input device '{}' released", self.config.device_name);
            self.ctx.bus.publish(Event::StreamActive {
                direction: Direction::Input,
                active: false,
            });
        }
    }

    pub fn is_running(&self) -> bool {
        self.ctx.running.load(Ordering::SeqCst)
    }

    /// Number of whole frames produced by the callback
    pub fn frames_captured(&self) -> u32 {
        self.ctx.sequence.load(Ordering::Relaxed)
    }

    /// Total samples received from the device
    pub fn samples_captured(&self) -> u64 {
        self.ctx.samples_captured.load(Ordering::Relaxed)
    }

    /// Frames dropped because the capture buffer was full or no frame
    /// buffer was free
    pub fn frames_dropped(&self) -> usize {
        self.ctx.output_buffer.overflow_count()
    }

    pub fn stream_errors(&self) -> u64 {
        self.ctx.stream_errors.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    device: &cpal::Device,
    cpal_config: &cpal::StreamConfig,
    config: &StreamConfig,
    ctx: CaptureContext,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let channels = config.channels.count();
    let mut framer = Framer::new(config.samples_per_frame());
    let err_ctx = ctx.clone();

    device.build_input_stream(
        cpal_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if !ctx.running.load(Ordering::Relaxed) {
                return;
            }
            ctx.samples_captured
                .fetch_add(data.len() as u64, Ordering::Relaxed);

            framer.push(data, |samples| deliver_frame(&ctx, samples, channels));
        },
        move |err| on_stream_error(err, &err_ctx),
        None,
    )
}

/// Hand one completed frame to the worker without allocating
fn deliver_frame(ctx: &CaptureContext, samples: &[f32], channels: u16) {
    let seq = ctx.sequence.fetch_add(1, Ordering::Relaxed);
    let Some(mut buffer) = ctx.pool.take() else {
        ctx.output_buffer.record_overflow();
        return;
    };
    buffer.extend_from_slice(samples);
    if let Err(frame) = ctx
        .output_buffer
        .try_push(AudioFrame::new(buffer, channels, seq))
    {
        ctx.pool.give(frame.samples);
    }
}

fn on_stream_error(err: cpal::StreamError, ctx: &CaptureContext) {
    ctx.stream_errors.fetch_add(1, Ordering::Relaxed);
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            tracing::error!("Input device disconnected");
            ctx.bus
                .publish(Event::Shutdown(ShutdownScope::Direction(Direction::Input)));
        }
        other => tracing::warn!("Input stream error: {}", other),
    }
}

/// Slices arbitrary callback buffers into frames of exactly `frame_samples`.
///
/// The staging buffer is allocated once; completed frames are lent to the
/// caller as a slice.
pub(crate) struct Framer {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl Framer {
    pub(crate) fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            pending: Vec::with_capacity(frame_samples.max(1)),
        }
    }

    /// Append `data`, handing every completed frame to `emit`
    pub(crate) fn push(&mut self, mut data: &[f32], mut emit: impl FnMut(&[f32])) {
        while !data.is_empty() {
            let take = (self.frame_samples - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == self.frame_samples {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{create_shared_buffer, FramePool};
    use crate::params::Channels;
    use std::time::Duration;

    #[test]
    fn test_framer_emits_fixed_frames() {
        let mut framer = Framer::new(4);
        let mut frames = Vec::new();

        framer.push(&[1.0, 2.0, 3.0], |f| frames.push(f.to_vec()));
        assert!(frames.is_empty());
        assert_eq!(framer.pending(), 3);

        let staging = framer.pending.as_ptr();
        framer.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(framer.pending(), 1);
        // The staging buffer is reused, never replaced
        assert_eq!(framer.pending.as_ptr(), staging);
    }

    fn context(ring: usize, pool: usize) -> CaptureContext {
        CaptureContext {
            running: Arc::new(AtomicBool::new(true)),
            output_buffer: create_shared_buffer(ring),
            pool: Arc::new(FramePool::new(pool, 4)),
            sequence: Arc::new(AtomicU32::new(0)),
            samples_captured: Arc::new(AtomicU64::new(0)),
            stream_errors: Arc::new(AtomicU64::new(0)),
            bus: EventBus::new(),
        }
    }

    #[test]
    fn test_full_ring_returns_buffer_to_pool() {
        let ctx = context(1, 3);
        deliver_frame(&ctx, &[0.1, 0.2, 0.3, 0.4], 2);
        deliver_frame(&ctx, &[0.5, 0.6, 0.7, 0.8], 2);

        assert_eq!(ctx.output_buffer.len(), 1);
        assert_eq!(ctx.output_buffer.overflow_count(), 1);
        assert_eq!(ctx.pool.available(), 2);

        let frame = ctx.output_buffer.try_pop().unwrap();
        assert_eq!(frame.samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frame.sequence, 0);
    }

    #[test]
    fn test_exhausted_pool_drops_frame() {
        let ctx = context(4, 1);
        deliver_frame(&ctx, &[0.0; 4], 1);
        deliver_frame(&ctx, &[0.0; 4], 1);

        assert_eq!(ctx.output_buffer.len(), 1);
        assert_eq!(ctx.output_buffer.overflow_count(), 1);
        assert_eq!(ctx.sequence.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_missing_device_fails_start() {
        let buffer = create_shared_buffer(8);
        let bus = EventBus::new();
        let config = StreamConfig {
            device_name: "no-such-capture-device-7a1b".into(),
            direction: Direction::Input,
            channels: Channels::Mono,
            sample_rate: 48000.0,
            latency: Duration::from_millis(5),
            frame_length: 960,
        };

        let pool = Arc::new(FramePool::new(4, 960));
        let mut capture = AudioCapture::new(config, buffer, pool, bus);
        assert!(capture.start().is_err());
        assert!(!capture.is_running());
    }
}
