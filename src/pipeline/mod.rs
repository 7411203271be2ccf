//! Capture and render pipeline
//!
//! ```text
//!  input device ─► capture queue ─► [tx worker] ─┬─► egress queue ─► network
//!                                                └─► loopback tap
//!  network ─► ingress queue ─► [rx worker] ─► render queue ─► output device
//! ```
//!
//! The two directions are independent: each has its own worker thread,
//! device stream and rate converter, and each stops on a shutdown event
//! covering its direction. Failing to open one device leaves the other
//! direction running.

pub mod rx;
pub mod tx;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::{
    create_shared_buffer, AudioFrame, AudioMsg, FramePool, SharedFramePool, SharedRingBuffer,
};
use crate::audio::capture::AudioCapture;
use crate::audio::playback::AudioPlayback;
use crate::constants::{CAPTURE_BUFFER_CAPACITY, EGRESS_BUFFER_CAPACITY, LOOPBACK_BUFFER_CAPACITY};
use crate::error::{AudioError, Result};
use crate::events::{EventBus, Topic};
use crate::params::{Direction, PipelineParameters};

pub use rx::{RxCounters, RxStage};
pub use tx::{TxCounters, TxOutput, TxStage};

/// Room for the extra output frames a resampler may emit in one call
const RESAMPLER_SLACK: usize = 16;

/// Snapshot of both directions' counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub capture_dropped: usize,
    pub frames_encoded: u64,
    pub encode_errors: u64,
    pub conversion_errors: u64,
    pub egress_dropped: u64,
    pub frames_received: u64,
    pub ingress_overwritten: usize,
    pub frames_decoded: u64,
    pub frames_concealed: u64,
    pub decode_errors: u64,
    pub frames_rendered: u64,
    pub render_overwritten: usize,
    pub silence_inserted: usize,
}

/// Owner of both pipeline directions and the queues between them
pub struct AudioPipeline {
    params: Arc<PipelineParameters>,
    bus: EventBus,
    running: Arc<AtomicBool>,
    capture: SharedRingBuffer<AudioFrame>,
    capture_pool: SharedFramePool,
    render: SharedRingBuffer<AudioFrame>,
    render_pool: SharedFramePool,
    egress: SharedRingBuffer<AudioMsg>,
    loopback: SharedRingBuffer<AudioMsg>,
    ingress: SharedRingBuffer<AudioMsg>,
    tx_counters: Arc<TxCounters>,
    rx_counters: Arc<RxCounters>,
    workers: Mutex<Vec<(Direction, JoinHandle<()>)>>,
}

impl AudioPipeline {
    /// Create the queues for `params`; no device is opened yet
    pub fn new(params: Arc<PipelineParameters>, bus: EventBus) -> Self {
        let rx_len = params.rx_buffer_length;
        // One buffer per queue slot, one held by the callback and one by the worker
        let render_frame = (params.frame_length as f64 * params.output.sample_rate
            / params.input.sample_rate)
            .ceil()
            .max(0.0) as usize
            + RESAMPLER_SLACK;
        Self {
            capture: create_shared_buffer(CAPTURE_BUFFER_CAPACITY),
            capture_pool: Arc::new(FramePool::new(
                CAPTURE_BUFFER_CAPACITY + 2,
                params.input.samples_per_frame(),
            )),
            render: create_shared_buffer(rx_len),
            render_pool: Arc::new(FramePool::new(
                rx_len + 2,
                render_frame * params.output.channels.count() as usize,
            )),
            egress: create_shared_buffer(EGRESS_BUFFER_CAPACITY),
            loopback: create_shared_buffer(LOOPBACK_BUFFER_CAPACITY),
            ingress: create_shared_buffer(rx_len),
            params,
            bus,
            running: Arc::new(AtomicBool::new(false)),
            tx_counters: Arc::default(),
            rx_counters: Arc::default(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start both directions.
    ///
    /// A direction that fails to start is logged and skipped. The call only
    /// fails when neither direction could be started.
    pub fn start(&self) -> Result<()> {
        let capture = self.start_capture();
        let render = self.start_render();

        match (capture, render) {
            (Err(e), Err(render_err)) => {
                tracing::error!("Render direction failed: {}", render_err);
                Err(e)
            }
            (Err(e), Ok(())) => {
                tracing::error!("Capture direction failed, rendering only: {}", e);
                Ok(())
            }
            (Ok(()), Err(e)) => {
                tracing::error!("Render direction failed, capturing only: {}", e);
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Open the input device and start the capture worker
    pub fn start_capture(&self) -> Result<()> {
        if self.is_active(Direction::Input) {
            return Ok(());
        }
        let stage = TxStage::new(&self.params)?;
        let mut capture = AudioCapture::new(
            self.params.input.clone(),
            self.capture.clone(),
            self.capture_pool.clone(),
            self.bus.clone(),
        );
        let shutdown = self.bus.subscribe(&[Topic::Shutdown]);
        capture.start()?;

        self.running.store(true, Ordering::SeqCst);
        let queues = tx::TxQueues {
            capture: self.capture.clone(),
            pool: self.capture_pool.clone(),
            egress: self.egress.clone(),
            loopback: self.loopback.clone(),
        };
        let running = self.running.clone();
        let counters = self.tx_counters.clone();

        let handle = thread::Builder::new()
            .name("tx-worker".into())
            .spawn(move || tx::run(capture, stage, queues, shutdown, running, counters))
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.workers.lock().push((Direction::Input, handle));
        Ok(())
    }

    /// Open the output device and start the render worker
    pub fn start_render(&self) -> Result<()> {
        if self.is_active(Direction::Output) {
            return Ok(());
        }
        let stage = RxStage::new(&self.params)?;
        let mut playback = AudioPlayback::new(
            self.params.output.clone(),
            self.render.clone(),
            self.render_pool.clone(),
            self.bus.clone(),
        );
        let shutdown = self.bus.subscribe(&[Topic::Shutdown]);
        playback.start()?;

        self.running.store(true, Ordering::SeqCst);
        let queues = rx::RxQueues {
            ingress: self.ingress.clone(),
            render: self.render.clone(),
            pool: self.render_pool.clone(),
        };
        let running = self.running.clone();
        let counters = self.rx_counters.clone();

        let handle = thread::Builder::new()
            .name("rx-worker".into())
            .spawn(move || rx::run(playback, stage, queues, shutdown, running, counters))
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.workers.lock().push((Direction::Output, handle));
        Ok(())
    }

    /// Whether a worker for `direction` is still running
    pub fn is_active(&self, direction: Direction) -> bool {
        self.workers
            .lock()
            .iter()
            .any(|(d, handle)| *d == direction && !handle.is_finished())
    }

    /// Encoded packets leaving the capture direction
    pub fn egress(&self) -> SharedRingBuffer<AudioMsg> {
        self.egress.clone()
    }

    /// Raw copy of every captured frame for local monitoring
    pub fn loopback(&self) -> SharedRingBuffer<AudioMsg> {
        self.loopback.clone()
    }

    /// Queue a received packet for rendering.
    ///
    /// A full queue evicts its oldest packet, which is returned.
    pub fn receive(&self, msg: AudioMsg) -> Option<AudioMsg> {
        self.ingress.push_overwrite(msg)
    }

    /// Packets waiting for the render worker
    pub fn pending_received(&self) -> usize {
        self.ingress.len()
    }

    pub fn params(&self) -> &PipelineParameters {
        &self.params
    }

    pub fn stats(&self) -> PipelineStats {
        let tx = &self.tx_counters;
        let rx = &self.rx_counters;
        PipelineStats {
            frames_captured: tx.frames_captured.load(Ordering::Relaxed),
            capture_dropped: self.capture.overflow_count(),
            frames_encoded: tx.frames_encoded.load(Ordering::Relaxed),
            encode_errors: tx.encode_errors.load(Ordering::Relaxed),
            conversion_errors: tx.conversion_errors.load(Ordering::Relaxed),
            egress_dropped: tx.egress_dropped.load(Ordering::Relaxed),
            frames_received: rx.frames_received.load(Ordering::Relaxed),
            ingress_overwritten: self.ingress.overflow_count(),
            frames_decoded: rx.frames_decoded.load(Ordering::Relaxed),
            frames_concealed: rx.frames_concealed.load(Ordering::Relaxed),
            decode_errors: rx.decode_errors.load(Ordering::Relaxed),
            frames_rendered: rx.frames_rendered.load(Ordering::Relaxed),
            render_overwritten: self.render.overflow_count(),
            silence_inserted: self.render.underrun_count(),
        }
    }

    /// Stop both directions, release the devices and empty every queue.
    ///
    /// Frames already being processed are completed first.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for (direction, handle) in workers {
            if handle.join().is_err() {
                tracing::error!("{} worker panicked", direction);
            }
        }

        let discarded = self.egress.clear() + self.loopback.clear() + self.ingress.clear();
        if discarded > 0 {
            tracing::debug!("Discarded {} queued messages on shutdown", discarded);
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::FrameTopic;
    use crate::config::AppConfig;

    fn pipeline(rx_buffer_length: usize) -> AudioPipeline {
        let config = AppConfig::from_toml_str(&format!(
            r#"
            [input-device]
            device-name = "no-such-input-5d2e"
            [output-device]
            device-name = "no-such-output-5d2e"
            [audio]
            rx-buffer-length = {rx_buffer_length}
            "#
        ))
        .unwrap();
        let params = PipelineParameters::from_config(&config).unwrap();
        AudioPipeline::new(Arc::new(params), EventBus::new())
    }

    #[test]
    fn test_missing_devices_fail_start() {
        let pipeline = pipeline(4);
        assert!(pipeline.start().is_err());
        assert!(!pipeline.is_active(Direction::Input));
        assert!(!pipeline.is_active(Direction::Output));
    }

    #[test]
    fn test_receive_evicts_oldest_beyond_rx_buffer_length() {
        let pipeline = pipeline(3);

        let evicted: Vec<_> = (0..5)
            .filter_map(|seq| {
                pipeline.receive(AudioMsg::raw(FrameTopic::Received, seq, vec![0; 2]))
            })
            .map(|m| m.sequence)
            .collect();
        assert_eq!(evicted, vec![0, 1]);
        assert_eq!(pipeline.pending_received(), 3);
        assert_eq!(pipeline.stats().ingress_overwritten, 2);
    }

    #[test]
    fn test_pools_cover_queue_depth() {
        let pipeline = pipeline(3);
        assert_eq!(pipeline.render_pool.capacity(), 5);
        assert_eq!(pipeline.capture_pool.capacity(), CAPTURE_BUFFER_CAPACITY + 2);
        assert_eq!(
            pipeline.capture_pool.frame_samples(),
            pipeline.params().input.samples_per_frame()
        );
        assert!(
            pipeline.render_pool.frame_samples() >= pipeline.params().output.samples_per_frame()
        );
    }

    #[test]
    fn test_shutdown_empties_queues() {
        let pipeline = pipeline(4);
        pipeline
            .egress()
            .push(AudioMsg::raw(FrameTopic::Capture, 0, vec![1, 2]));
        pipeline.receive(AudioMsg::raw(FrameTopic::Received, 0, vec![1, 2]));

        pipeline.shutdown();
        assert!(pipeline.egress().is_empty());
        assert_eq!(pipeline.pending_received(), 0);
        assert_eq!(pipeline.stats(), PipelineStats::default());
    }
}
