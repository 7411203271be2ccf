//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod convert;
pub mod device;
pub mod playback;
pub mod resample;
mod stream;

pub use buffer::{AudioFrame, AudioMsg, FrameTopic, Payload, RingBuffer};
pub use capture::AudioCapture;
pub use convert::FormatConverter;
pub use device::{find_device, list_devices, AudioDevice, DeviceInfo};
pub use playback::AudioPlayback;
pub use resample::RateConverter;
