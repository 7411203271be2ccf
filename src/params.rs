//! Typed, validated pipeline parameters
//!
//! [`PipelineParameters`] is built once at startup from an [`AppConfig`] and
//! is read-only afterwards. It can only be obtained through
//! [`PipelineParameters::from_config`], which runs the full validator first.

use std::fmt;
use std::time::Duration;

use crate::config::{AppConfig, DeviceSection};
use crate::error::ConfigError;
use crate::validation::{validate, Violations};

/// Bit depths accepted for the PCM codec
pub const PCM_BIT_DEPTHS: [u32; 4] = [8, 12, 16, 24];

/// Packet durations (seconds) the Opus codec can produce
pub const OPUS_FRAME_DURATIONS: [f64; 6] = [0.0025, 0.005, 0.01, 0.02, 0.04, 0.06];

/// Opus bitrate bounds in bits per second
pub const OPUS_BITRATE_RANGE: std::ops::RangeInclusive<i64> = 6000..=510_000;

/// Opus always works on 16 bit samples
pub const OPUS_BIT_DEPTH: u32 = 16;

/// Largest allowed ratio between device and pipeline rate, either way
pub const MAX_RESAMPLE_RATIO: f64 = 256.0;

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Channel layout, mono or stereo only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channels {
    Mono,
    Stereo,
}

impl Channels {
    /// Parse `"mono"` / `"stereo"`, case-insensitive
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "MONO" => Some(Channels::Mono),
            "STEREO" => Some(Channels::Stereo),
            _ => None,
        }
    }

    pub fn count(self) -> u16 {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

/// Wire codec selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Pcm,
    Opus,
}

impl CodecKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "PCM" => Some(CodecKind::Pcm),
            "OPUS" => Some(CodecKind::Opus),
            _ => None,
        }
    }
}

/// Opus encoder application profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpusApplication {
    RestrictedLowDelay,
    Voip,
    Audio,
}

impl OpusApplication {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "RESTRICTED_LOWDELAY" => Some(OpusApplication::RestrictedLowDelay),
            "VOIP" => Some(OpusApplication::Voip),
            "AUDIO" => Some(OpusApplication::Audio),
            _ => None,
        }
    }
}

/// Maximum audio bandwidth of the Opus encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpusBandwidth {
    Narrowband,
    Mediumband,
    Wideband,
    Superwideband,
    Fullband,
}

impl OpusBandwidth {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "NARROWBAND" => Some(OpusBandwidth::Narrowband),
            "MEDIUMBAND" => Some(OpusBandwidth::Mediumband),
            "WIDEBAND" => Some(OpusBandwidth::Wideband),
            "SUPERWIDEBAND" => Some(OpusBandwidth::Superwideband),
            "FULLBAND" => Some(OpusBandwidth::Fullband),
            _ => None,
        }
    }
}

/// Resampler quality, 0 (fastest) to 4 (best)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResampleQuality(u8);

impl ResampleQuality {
    pub const FASTEST: Self = Self(0);
    pub const BEST: Self = Self(4);

    pub fn new(level: i64) -> Option<Self> {
        u8::try_from(level)
            .ok()
            .filter(|l| *l <= Self::BEST.0)
            .map(Self)
    }

    pub fn level(self) -> u8 {
        self.0
    }
}

impl Default for ResampleQuality {
    fn default() -> Self {
        Self(1)
    }
}

/// Settings for one opened device stream. Immutable once the stream is open.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub device_name: String,
    pub direction: Direction,
    pub channels: Channels,
    pub sample_rate: f64,
    pub latency: Duration,
    /// Samples per channel delivered in one callback frame
    pub frame_length: usize,
}

impl StreamConfig {
    /// Samples in one interleaved frame
    pub fn samples_per_frame(&self) -> usize {
        self.frame_length * self.channels.count() as usize
    }

    /// Wall-clock length of one frame
    ///
    /// Zero when the rate cannot describe a real device clock.
    pub fn frame_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.frame_length as f64 / self.sample_rate).unwrap_or_default()
    }

    /// Device buffer size in frames for the requested latency.
    ///
    /// Falls back to one callback frame when the latency rounds to nothing.
    pub fn buffer_frames(&self) -> usize {
        let frames = (self.latency.as_secs_f64() * self.sample_rate).round();
        if frames.is_finite() && frames >= 1.0 {
            frames as usize
        } else {
            self.frame_length
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PcmParams {
    pub sample_rate: f64,
    pub bit_depth: u32,
    pub channels: Channels,
    pub quality: ResampleQuality,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpusParams {
    pub application: OpusApplication,
    pub max_bandwidth: OpusBandwidth,
    pub bitrate: u32,
    pub complexity: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodecParams {
    Pcm(PcmParams),
    Opus(OpusParams),
}

/// The validated, cross-cutting pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParameters {
    pub input: StreamConfig,
    pub output: StreamConfig,
    pub codec: CodecParams,
    pub frame_length: usize,
    pub rx_buffer_length: usize,
}

impl PipelineParameters {
    /// Validate `config` and freeze it into typed parameters.
    ///
    /// Returns every violation at once when the configuration is invalid.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let violations = validate(config);
        if !violations.is_empty() {
            return Err(ConfigError::Invalid(violations));
        }
        Self::build(config).ok_or_else(|| ConfigError::Invalid(Violations::default()))
    }

    fn build(config: &AppConfig) -> Option<Self> {
        let frame_length = usize::try_from(config.audio.frame_length).ok()?;
        let rx_buffer_length = usize::try_from(config.audio.rx_buffer_length).ok()?;

        let codec = match CodecKind::parse(&config.audio.codec)? {
            CodecKind::Pcm => CodecParams::Pcm(PcmParams {
                sample_rate: config.pcm.samplingrate,
                bit_depth: u32::try_from(config.pcm.bitdepth).ok()?,
                channels: Channels::parse(&config.pcm.channels)?,
                quality: ResampleQuality::new(config.pcm.resampling_quality)?,
            }),
            CodecKind::Opus => CodecParams::Opus(OpusParams {
                application: OpusApplication::parse(&config.opus.application)?,
                max_bandwidth: OpusBandwidth::parse(&config.opus.max_bandwidth)?,
                bitrate: u32::try_from(config.opus.bitrate).ok()?,
                complexity: u8::try_from(config.opus.complexity).ok()?,
            }),
        };

        Some(Self {
            input: stream_config(&config.input_device, Direction::Input, frame_length)?,
            output: stream_config(&config.output_device, Direction::Output, frame_length)?,
            codec,
            frame_length,
            rx_buffer_length,
        })
    }

    pub fn codec_kind(&self) -> CodecKind {
        match self.codec {
            CodecParams::Pcm(_) => CodecKind::Pcm,
            CodecParams::Opus(_) => CodecKind::Opus,
        }
    }

    /// Sampling rate of audio on the wire
    pub fn wire_rate(&self) -> f64 {
        match &self.codec {
            CodecParams::Pcm(pcm) => pcm.sample_rate,
            CodecParams::Opus(_) => self.input.sample_rate,
        }
    }

    /// Channel layout of audio on the wire
    pub fn wire_channels(&self) -> Channels {
        match &self.codec {
            CodecParams::Pcm(pcm) => pcm.channels,
            CodecParams::Opus(_) => self.input.channels,
        }
    }

    /// Fixed-point depth of raw pipeline samples
    pub fn bit_depth(&self) -> u32 {
        match &self.codec {
            CodecParams::Pcm(pcm) => pcm.bit_depth,
            CodecParams::Opus(_) => OPUS_BIT_DEPTH,
        }
    }

    pub fn resample_quality(&self) -> ResampleQuality {
        match &self.codec {
            CodecParams::Pcm(pcm) => pcm.quality,
            CodecParams::Opus(_) => ResampleQuality::default(),
        }
    }
}

fn stream_config(
    section: &DeviceSection,
    direction: Direction,
    frame_length: usize,
) -> Option<StreamConfig> {
    let latency_ms = if section.latency_ms.is_finite() && section.latency_ms > 0.0 {
        section.latency_ms
    } else {
        0.0
    };
    Some(StreamConfig {
        device_name: section.device_name.clone(),
        direction,
        channels: Channels::parse(&section.channels)?,
        sample_rate: section.samplingrate,
        latency: Duration::from_secs_f64(latency_ms / 1000.0),
        frame_length,
    })
}
