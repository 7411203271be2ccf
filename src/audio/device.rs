//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::error::AudioError;
use crate::params::Direction;

/// Name that falls back to the host default device
pub const DEFAULT_DEVICE_NAME: &str = "default";

/// Sample rates checked when describing device capabilities
const COMMON_SAMPLE_RATES: [u32; 9] = [8000, 16000, 22050, 24000, 44100, 48000, 88200, 96000, 192000];

/// Description of an enumerated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// A resolved hardware device bound to one direction
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub direction: Direction,
}

impl AudioDevice {
    fn from_cpal(device: cpal::Device, name: String, direction: Direction) -> Self {
        Self {
            inner: device,
            name,
            direction,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<DeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device, Direction::Input);
                devices.push(DeviceInfo {
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);

                // Duplex devices show up in both lists
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }

                let (sample_rates, channels) = get_device_capabilities(&device, Direction::Output);
                devices.push(DeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

fn get_device_capabilities(device: &cpal::Device, direction: Direction) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map(|it| it.collect())
            .unwrap_or_default(),
        Direction::Output => device
            .supported_output_configs()
            .map(|it| it.collect())
            .unwrap_or_default(),
    };

    let mut rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        for rate_val in COMMON_SAMPLE_RATES {
            let rate = cpal::SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !rates.contains(&rate_val)
            {
                rates.push(rate_val);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    rates.sort_unstable();
    channels.sort_unstable();
    (rates, channels)
}

/// Resolve a configured device name for `direction`.
///
/// The first device whose name matches exactly wins. The name `default`
/// falls back to the host default device when no device carries it.
pub fn find_device(name: &str, direction: Direction) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| AudioError::DeviceOpenFailed {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            tracing::debug!("Resolved {} device '{}'", direction, name);
            return Ok(AudioDevice::from_cpal(device, name.to_string(), direction));
        }
    }

    if name.eq_ignore_ascii_case(DEFAULT_DEVICE_NAME) {
        let fallback = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        if let Some(device) = fallback {
            let resolved = device.name().unwrap_or_else(|_| name.to_string());
            tracing::debug!("Using host default {} device '{}'", direction, resolved);
            return Ok(AudioDevice::from_cpal(device, resolved, direction));
        }
    }

    Err(AudioError::DeviceNotFound {
        name: name.to_string(),
        direction,
    })
}
