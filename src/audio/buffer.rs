//! Lock-free bounded queues for audio frames and messages
//!
//! Every stage of the pipeline is connected through a [`RingBuffer`]. Pushing
//! and popping never blocks, so device callbacks can use them directly. Two
//! overflow policies exist:
//!
//! - [`RingBuffer::push`] rejects the new item (capture side: drop newest)
//! - [`RingBuffer::push_overwrite`] evicts the oldest item (receive side:
//!   bounded staleness, absorbs network jitter)

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Audio frame containing interleaved device samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved audio samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Frame sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            sequence,
        }
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Pipeline stage a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameTopic {
    /// Encoded audio leaving towards the network
    Capture,
    /// Copy of captured audio for local monitoring
    Loopback,
    /// Encoded audio arriving from the network
    Received,
    /// Audio after decoding, before rendering
    Decoded,
}

/// Message payload: fixed-point samples or an encoded packet
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Interleaved fixed-point samples at the pipeline bit depth
    Raw(Vec<i32>),
    Encoded(Bytes),
}

/// A unit of audio travelling between pipeline stages.
///
/// Messages are moved, never shared: once pushed into a queue the sender no
/// longer has access to it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMsg {
    pub topic: FrameTopic,
    pub sequence: u32,
    pub payload: Payload,
}

impl AudioMsg {
    pub fn raw(topic: FrameTopic, sequence: u32, samples: Vec<i32>) -> Self {
        Self {
            topic,
            sequence,
            payload: Payload::Raw(samples),
        }
    }

    pub fn encoded(topic: FrameTopic, sequence: u32, data: Bytes) -> Self {
        Self {
            topic,
            sequence,
            payload: Payload::Encoded(data),
        }
    }
}

/// Lock-free bounded FIFO with drop accounting
pub struct RingBuffer<T> {
    queue: ArrayQueue<T>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the specified capacity (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push an item into the buffer.
    /// Returns false if the buffer is full; the item is dropped.
    pub fn push(&self, item: T) -> bool {
        match self.queue.push(item) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Push an item, handing it back when the buffer is full so the caller
    /// decides where it is released
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.queue.push(item).map_err(|item| {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            item
        })
    }

    /// Count an item the producer dropped before it reached the buffer
    pub fn record_overflow(&self) {
        self.overflow_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Push an item, evicting the oldest one when full.
    /// Returns the evicted item, if any.
    pub fn push_overwrite(&self, item: T) -> Option<T> {
        let evicted = self.queue.force_push(item);
        if evicted.is_some() {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Pop an item from the buffer.
    /// Returns None if the buffer is empty (underrun)
    pub fn pop(&self) -> Option<T> {
        match self.queue.pop() {
            Some(item) => Some(item),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Try to pop without counting underrun
    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Discard everything queued, returning how many items were dropped
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.queue.pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Items dropped or evicted because the buffer was full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Pops that found the buffer empty
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Preallocated sample buffers shared between a device callback and its
/// worker.
///
/// The callback only takes and returns buffers, so it never allocates or
/// frees. The pool holds every buffer it created, which means returning a
/// buffer that came from the pool always finds room.
pub struct FramePool {
    free: ArrayQueue<Vec<f32>>,
    frame_samples: usize,
}

impl FramePool {
    /// Create `count` empty buffers able to hold `frame_samples` each
    pub fn new(count: usize, frame_samples: usize) -> Self {
        let free = ArrayQueue::new(count.max(1));
        while free.push(Vec::with_capacity(frame_samples)).is_ok() {}
        Self {
            free,
            frame_samples,
        }
    }

    /// Take an empty buffer, or `None` when every buffer is in use
    pub fn take(&self) -> Option<Vec<f32>> {
        self.free.pop()
    }

    /// Return a buffer for reuse. A buffer arriving at a full pool did not
    /// come from it and is released here.
    pub fn give(&self, mut buffer: Vec<f32>) {
        buffer.clear();
        let _ = self.free.push(buffer);
    }

    /// Copy `samples` into a pooled buffer, allocating only when the pool
    /// is exhausted. Worker side only.
    pub fn fill(&self, samples: &[f32]) -> Vec<f32> {
        let mut buffer = self
            .take()
            .unwrap_or_else(|| Vec::with_capacity(self.frame_samples.max(samples.len())));
        buffer.extend_from_slice(samples);
        buffer
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }

    /// Samples each preallocated buffer holds without growing
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}

pub type SharedFramePool = Arc<FramePool>;

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer<T> = Arc<RingBuffer<T>>;

/// Create a new shared ring buffer
pub fn create_shared_buffer<T>(capacity: usize) -> SharedRingBuffer<T> {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(4);

        let frame1 = AudioFrame::new(vec![0.0; 480], 2, 0);
        let frame2 = AudioFrame::new(vec![1.0; 480], 2, 1);

        assert!(buffer.push(frame1));
        assert!(buffer.push(frame2));
        assert_eq!(buffer.len(), 2);

        let popped = buffer.pop().unwrap();
        assert_eq!(popped.sequence, 0);
        assert_eq!(popped.samples_per_channel(), 240);

        let popped = buffer.pop().unwrap();
        assert_eq!(popped.sequence, 1);

        assert!(buffer.is_empty());
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_push_drops_newest_when_full() {
        let buffer = RingBuffer::new(2);
        assert!(buffer.push(1));
        assert!(buffer.push(2));
        assert!(!buffer.push(3));
        assert_eq!(buffer.overflow_count(), 1);
        assert_eq!(buffer.try_pop(), Some(1));
        assert_eq!(buffer.try_pop(), Some(2));
    }

    #[test]
    fn test_overwrite_drops_oldest_when_full() {
        let buffer = RingBuffer::new(3);
        for i in 0..10 {
            buffer.push_overwrite(i);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.overflow_count(), 7);
        assert_eq!(buffer.try_pop(), Some(7));
        assert_eq!(buffer.try_pop(), Some(8));
        assert_eq!(buffer.try_pop(), Some(9));
        assert_eq!(buffer.underrun_count(), 0);
    }

    #[test]
    fn test_overwrite_under_sustained_pressure_never_blocks() {
        let buffer = create_shared_buffer::<AudioMsg>(8);
        let producer = buffer.clone();

        let handle = std::thread::spawn(move || {
            for seq in 0..10_000u32 {
                producer.push_overwrite(AudioMsg::raw(FrameTopic::Received, seq, vec![0; 4]));
            }
        });
        handle.join().unwrap();

        assert_eq!(buffer.len(), 8);
        let first = buffer.try_pop().unwrap();
        assert_eq!(first.sequence, 10_000 - 8);
        assert_eq!(buffer.overflow_count(), 10_000 - 8);
    }

    #[test]
    fn test_clear_and_fill_level() {
        let buffer = RingBuffer::new(4);
        buffer.push(AudioMsg::encoded(FrameTopic::Capture, 0, Bytes::from_static(b"ab")));
        buffer.push(AudioMsg::encoded(FrameTopic::Capture, 1, Bytes::from_static(b"cd")));
        assert_eq!(buffer.fill_level(), 0.5);
        assert_eq!(buffer.clear(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_try_push_hands_back_rejected_item() {
        let buffer = RingBuffer::new(1);
        assert_eq!(buffer.try_push(1), Ok(()));
        assert_eq!(buffer.try_push(2), Err(2));
        assert_eq!(buffer.overflow_count(), 1);
        buffer.record_overflow();
        assert_eq!(buffer.overflow_count(), 2);
    }

    #[test]
    fn test_frame_pool_recycles_without_growth() {
        let pool = FramePool::new(2, 480);
        let a = pool.take().unwrap();
        let b = pool.take().unwrap();
        assert!(a.capacity() >= 480);
        assert!(pool.take().is_none());

        let ptr = a.as_ptr();
        pool.give(a);
        let mut again = pool.take().unwrap();
        assert_eq!(again.as_ptr(), ptr);
        again.extend_from_slice(&[0.5; 480]);
        assert_eq!(again.as_ptr(), ptr);

        pool.give(again);
        pool.give(b);
        assert_eq!(pool.available(), 2);

        // Foreign buffers never overfill the pool
        pool.give(vec![1.0; 4]);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_frame_pool_fill_falls_back_to_allocation() {
        let pool = FramePool::new(1, 4);
        let first = pool.fill(&[1.0, 2.0]);
        let second = pool.fill(&[3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(first, vec![1.0, 2.0]);
        assert_eq!(second.len(), 5);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer: RingBuffer<u8> = RingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }
}
