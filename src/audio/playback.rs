//! Audio rendering to the output device
//!
//! The device callback drains frames from the render buffer. When the buffer
//! runs dry the rest of the device buffer is filled with silence and the
//! underrun is counted; the callback never waits for data. Finished frame
//! buffers go back to the frame pool instead of being freed in the callback.

use cpal::traits::DeviceTrait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::audio::buffer::{AudioFrame, FramePool, SharedFramePool, SharedRingBuffer};
use crate::audio::device::find_device;
use crate::audio::stream::{build_and_play, spawn_stream_thread};
use crate::error::AudioError;
use crate::events::{Event, EventBus, ShutdownScope};
use crate::params::{Direction, StreamConfig};

#[derive(Clone)]
struct PlaybackContext {
    running: Arc<AtomicBool>,
    input_buffer: SharedRingBuffer<AudioFrame>,
    pool: SharedFramePool,
    frames_rendered: Arc<AtomicU64>,
    stream_errors: Arc<AtomicU64>,
    bus: EventBus,
}

/// Audio playback instance for the output device
pub struct AudioPlayback {
    config: StreamConfig,
    ctx: PlaybackContext,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioPlayback {
    pub fn new(
        config: StreamConfig,
        input_buffer: SharedRingBuffer<AudioFrame>,
        pool: SharedFramePool,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            ctx: PlaybackContext {
                running: Arc::new(AtomicBool::new(false)),
                input_buffer,
                pool,
                frames_rendered: Arc::new(AtomicU64::new(0)),
                stream_errors: Arc::new(AtomicU64::new(0)),
                bus,
            },
            thread_handle: None,
        }
    }

    /// Open the device and start rendering
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.is_running() {
            return Ok(());
        }

        self.ctx.running.store(true, Ordering::SeqCst);

        let config = self.config.clone();
        let ctx = self.ctx.clone();
        let result = spawn_stream_thread(
            "playback".to_string(),
            self.ctx.running.clone(),
            move || {
                let device = find_device(&config.device_name, Direction::Output)?;
                let name = device.name.clone();
                let device = device.into_inner();
                build_and_play(&name, &config, |cpal_config| {
                    build_output_stream(&device, cpal_config, ctx.clone())
                })
            },
        );

        match result {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                self.ctx.bus.publish(Event::StreamActive {
                    direction: Direction::Output,
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

    /// Stop rendering and release the device
    pub fn stop(&mut self) {
        self.ctx.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Output device '{}' released", self.config.device_name);
            self.ctx.bus.publish(Event::StreamActive {
                direction: Direction::Output,
                active: false,
            });
        }
    }

    pub fn is_running(&self) -> bool {
        self.ctx.running.load(Ordering::SeqCst)
    }

    /// Frames taken from the render buffer
    pub fn frames_rendered(&self) -> u64 {
        self.ctx.frames_rendered.load(Ordering::Relaxed)
    }

    /// Callbacks that had to insert silence
    pub fn silence_inserted(&self) -> usize {
        self.ctx.input_buffer.underrun_count()
    }

    pub fn stream_errors(&self) -> u64 {
        self.ctx.stream_errors.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_output_stream(
    device: &cpal::Device,
    cpal_config: &cpal::StreamConfig,
    ctx: PlaybackContext,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let mut reader = FrameReader::default();
    let err_ctx = ctx.clone();

    device.build_output_stream(
        cpal_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if !ctx.running.load(Ordering::Relaxed) {
                data.fill(0.0);
                return;
            }
            reader.fill(data, &ctx.input_buffer, &ctx.pool, &ctx.frames_rendered);
        },
        move |err| {
            err_ctx.stream_errors.fetch_add(1, Ordering::Relaxed);
            match err {
                cpal::StreamError::DeviceNotAvailable => {
                    tracing::error!("Output device disconnected");
                    err_ctx
                        .bus
                        .publish(Event::Shutdown(ShutdownScope::Direction(Direction::Output)));
                }
                other => tracing::warn!("Output stream error: {}", other),
            }
        },
        None,
    )
}

/// Copies queued frames into device buffers of any size
#[derive(Default)]
pub(crate) struct FrameReader {
    current: Option<AudioFrame>,
    cursor: usize,
}

impl FrameReader {
    /// Fill `out` from `source`, padding with silence when it runs dry.
    /// Returns false when silence had to be inserted.
    pub(crate) fn fill(
        &mut self,
        out: &mut [f32],
        source: &SharedRingBuffer<AudioFrame>,
        pool: &FramePool,
        frames_rendered: &AtomicU64,
    ) -> bool {
        let mut written = 0;
        while written < out.len() {
            let exhausted = self
                .current
                .as_ref()
                .map_or(true, |frame| self.cursor >= frame.samples.len());
            if exhausted {
                if let Some(done) = self.current.take() {
                    pool.give(done.samples);
                }
                match source.pop() {
                    Some(frame) => {
                        frames_rendered.fetch_add(1, Ordering::Relaxed);
                        self.current = Some(frame);
                        self.cursor = 0;
                        continue;
                    }
                    None => {
                        out[written..].fill(0.0);
                        return false;
                    }
                }
            }

            let Some(frame) = self.current.as_ref() else {
                break;
            };
            let n = (frame.samples.len() - self.cursor).min(out.len() - written);
            out[written..written + n].copy_from_slice(&frame.samples[self.cursor..self.cursor + n]);
            self.cursor += n;
            written += n;
        }
        true
    }
}
