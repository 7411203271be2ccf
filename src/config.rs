//! Application configuration
//!
//! The configuration is a flat key space grouped into TOML tables. Values are
//! kept exactly as written (strings stay strings, numbers stay signed) so the
//! validator can report every bad value instead of the parser stopping at the
//! first one. Typed parameters are produced by
//! [`PipelineParameters::from_config`](crate::params::PipelineParameters::from_config).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Complete application configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct AppConfig {
    pub input_device: DeviceSection,
    pub output_device: DeviceSection,
    pub pcm: PcmSection,
    pub opus: OpusSection,
    pub audio: AudioSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_device: DeviceSection {
                device_name: "default".into(),
                samplingrate: 48000.0,
                latency_ms: 5.0,
                channels: "mono".into(),
            },
            output_device: DeviceSection {
                device_name: "default".into(),
                samplingrate: 48000.0,
                latency_ms: 5.0,
                channels: "stereo".into(),
            },
            pcm: PcmSection::default(),
            opus: OpusSection::default(),
            audio: AudioSection::default(),
        }
    }
}

/// `[input-device]` / `[output-device]`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct DeviceSection {
    pub device_name: String,
    pub samplingrate: f64,
    pub latency_ms: f64,
    pub channels: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            device_name: "default".into(),
            samplingrate: 48000.0,
            latency_ms: 5.0,
            channels: "mono".into(),
        }
    }
}

/// `[pcm]`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct PcmSection {
    pub samplingrate: f64,
    pub bitdepth: i64,
    pub channels: String,
    pub resampling_quality: i64,
}

impl Default for PcmSection {
    fn default() -> Self {
        Self {
            samplingrate: 16000.0,
            bitdepth: 16,
            channels: "stereo".into(),
            resampling_quality: 1,
        }
    }
}

/// `[opus]`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct OpusSection {
    pub application: String,
    pub bitrate: i64,
    pub complexity: i64,
    pub max_bandwidth: String,
}

impl Default for OpusSection {
    fn default() -> Self {
        Self {
            application: "restricted_lowdelay".into(),
            bitrate: 32000,
            complexity: 9,
            max_bandwidth: "wideband".into(),
        }
    }
}

/// `[audio]`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct AudioSection {
    pub codec: String,
    /// Samples per channel in one device frame
    pub frame_length: i64,
    /// Receive (jitter) buffer depth in frames
    pub rx_buffer_length: i64,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            codec: "opus".into(),
            frame_length: 960,
            rx_buffer_length: 10,
        }
    }
}

impl AppConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from an explicit file, or from the default
    /// location when `path` is `None`.
    ///
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::from_toml_str(&text)
            }
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }
}

/// Platform specific default configuration path
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "remote-audio")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
