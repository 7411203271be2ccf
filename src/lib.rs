//! # Remote Audio
//!
//! Low-latency audio streaming core for remote radio operation.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          CAPTURE (tx)                                │
//! │  ┌──────────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐   │
//! │  │ Input device │──►│  Remix   │──►│ Resample │──►│  Quantize    │   │
//! │  │  (callback)  │   │ channels │   │ to wire  │   │  bit depth   │   │
//! │  └──────────────┘   └──────────┘   └──────────┘   └──────┬───────┘   │
//! │                                                          │           │
//! │                                        ┌─────────────────┼─────┐     │
//! │                                        ▼                 ▼     │     │
//! │                                 ┌────────────┐   ┌────────────┐│     │
//! │                                 │  Loopback  │   │ PCM / Opus ││     │
//! │                                 │    tap     │   │  encoder   ││     │
//! │                                 └────────────┘   └─────┬──────┘│     │
//! └────────────────────────────────────────────────────────┼───────┘─────┘
//!                                                          ▼ egress
//!                                                       network
//!                                                          │ ingress
//! ┌────────────────────────────────────────────────────────┼─────────────┐
//! │                          RENDER (rx)                   ▼             │
//! │  ┌──────────────┐   ┌──────────┐   ┌──────────┐   ┌────────────┐     │
//! │  │Output device │◄──│ Resample │◄──│  Remix   │◄──│ PCM / Opus │     │
//! │  │  (callback)  │   │to device │   │ channels │   │  decoder   │     │
//! │  └──────────────┘   └──────────┘   └──────────┘   └────────────┘     │
//! └──────────────────────────────────────────────────────────────────────┘
//!
//!      EventBus: StreamActive · TransmitRequest · LinkStatus · Shutdown
//! ```
//!
//! Configuration is validated once into [`params::PipelineParameters`] and
//! never mutated afterwards. Device callbacks only touch lock-free queues.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod params;
pub mod pipeline;
pub mod validation;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// How long a worker sleeps when its input queue is empty
    pub const WORKER_POLL_INTERVAL: Duration = Duration::from_micros(500);

    /// Device frames buffered between the capture callback and its worker
    pub const CAPTURE_BUFFER_CAPACITY: usize = 16;

    /// Encoded packets waiting for the network
    pub const EGRESS_BUFFER_CAPACITY: usize = 64;

    /// Raw frames kept for local monitoring
    pub const LOOPBACK_BUFFER_CAPACITY: usize = 16;
}
