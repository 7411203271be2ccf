//! Device stream binding shared by capture and playback
//!
//! A cpal stream lives on a dedicated thread for its whole life. The thread
//! opens the device, reports success or failure back to the caller, then
//! keeps the stream alive until the `running` flag clears. Dropping the
//! stream at the end of the thread releases the device on every exit path.

use cpal::traits::StreamTrait;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::AudioError;
use crate::params::StreamConfig;

/// How often the stream thread checks whether it should stop
const KEEPALIVE_POLL: Duration = Duration::from_millis(10);

/// Translate stream settings into a cpal configuration
pub(crate) fn cpal_config(config: &StreamConfig, fixed_buffer: bool) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: config.channels.count(),
        sample_rate: cpal::SampleRate(config.sample_rate.round() as u32),
        buffer_size: if fixed_buffer {
            cpal::BufferSize::Fixed(config.buffer_frames() as u32)
        } else {
            cpal::BufferSize::Default
        },
    }
}

/// Build and start a stream, preferring a fixed buffer sized by the
/// configured latency.
///
/// Hosts that reject fixed buffers get the device default; callbacks reframe
/// the data so the pipeline still sees whole frames.
pub(crate) fn build_and_play<B>(
    device_name: &str,
    config: &StreamConfig,
    mut build: B,
) -> Result<cpal::Stream, AudioError>
where
    B: FnMut(&cpal::StreamConfig) -> Result<cpal::Stream, cpal::BuildStreamError>,
{
    let open_failed = |reason: String| AudioError::DeviceOpenFailed {
        name: device_name.to_string(),
        reason,
    };

    let stream = match build(&cpal_config(config, true)) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(
                "{} device '{}' rejected a {} frame buffer ({}), using the device default",
                config.direction,
                device_name,
                config.frame_length,
                e
            );
            build(&cpal_config(config, false)).map_err(|e| open_failed(e.to_string()))?
        }
    };

    stream.play().map_err(|e| open_failed(e.to_string()))?;

    tracing::info!(
        "Opened {} device '{}': {} Hz, {} channel(s), {} frames, latency {:?} ({} frame buffer)",
        config.direction,
        device_name,
        config.sample_rate,
        config.channels.count(),
        config.frame_length,
        config.latency,
        config.buffer_frames()
    );
    Ok(stream)
}

/// Run `open` on a new thread and keep the resulting stream alive while
/// `running` is set. Returns once the stream is playing or failed to open.
pub(crate) fn spawn_stream_thread<F>(
    thread_name: String,
    running: Arc<AtomicBool>,
    open: F,
) -> Result<JoinHandle<()>, AudioError>
where
    F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
{
    let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

    let handle = thread::Builder::new()
        .name(thread_name)
        .spawn(move || match open() {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                while running.load(Ordering::Relaxed) {
                    thread::sleep(KEEPALIVE_POLL);
                }
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        })
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(AudioError::StreamError(
                "stream thread exited during startup".into(),
            ))
        }
    }
}
