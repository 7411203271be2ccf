//! Cross-parameter legality checks
//!
//! [`validate`] never stops at the first problem: every rule is evaluated and
//! all violations are returned together so a misconfiguration can be fixed
//! in one pass. Codec-specific rules only run when the codec value itself is
//! legal, which avoids cascades of follow-up errors from a typo.

use std::fmt;

use crate::config::AppConfig;
use crate::params::{
    Channels, CodecKind, OpusApplication, OpusBandwidth, ResampleQuality, MAX_RESAMPLE_RATIO,
    OPUS_BITRATE_RANGE, OPUS_FRAME_DURATIONS, PCM_BIT_DEPTHS,
};

/// A single illegal configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: &'static str,
    pub message: &'static str,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for '{}': {}", self.field, self.message)
    }
}

/// The complete set of violations found in a configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(Vec<Violation>);

impl Violations {
    fn push(&mut self, field: &'static str, message: &'static str) {
        self.0.push(Violation { field, message });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }

    /// Whether any violation concerns `field`
    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|v| v.field == field)
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {}", violation)?;
        }
        Ok(())
    }
}

impl IntoIterator for Violations {
    type Item = Violation;
    type IntoIter = std::vec::IntoIter<Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

const CHANNELS_MSG: &str = "allowed values are [MONO, STEREO]";

/// Check every audio parameter rule against `config`
pub fn validate(config: &AppConfig) -> Violations {
    let mut violations = Violations::default();

    if Channels::parse(&config.input_device.channels).is_none() {
        violations.push("input-device.channels", CHANNELS_MSG);
    }
    if Channels::parse(&config.output_device.channels).is_none() {
        violations.push("output-device.channels", CHANNELS_MSG);
    }

    match CodecKind::parse(&config.audio.codec) {
        Some(CodecKind::Pcm) => {
            check_pcm(config, &mut violations);
            check_output_rate(config, config.pcm.samplingrate, &mut violations);
        }
        Some(CodecKind::Opus) => {
            check_opus(config, &mut violations);
            check_output_rate(config, config.input_device.samplingrate, &mut violations);
        }
        None => violations.push("audio.codec", "allowed values are [OPUS, PCM]"),
    }

    if config.audio.rx_buffer_length <= 0 {
        violations.push("audio.rx-buffer-length", "value must be > 0");
    }

    violations
}

fn check_pcm(config: &AppConfig, violations: &mut Violations) {
    let pcm = &config.pcm;

    if pcm.samplingrate.is_nan() || pcm.samplingrate <= 0.0 {
        violations.push("pcm.samplingrate", "value must be > 0");
    }

    if !ratio_within_bounds(config.input_device.samplingrate, pcm.samplingrate) {
        violations.push(
            "pcm.samplingrate",
            "ratio between input-device & pcm samplingrate must be within [1/256, 256]",
        );
    }

    if !PCM_BIT_DEPTHS.iter().any(|&depth| i64::from(depth) == pcm.bitdepth) {
        violations.push("pcm.bitdepth", "allowed values are [8, 12, 16, 24]");
    }

    if Channels::parse(&pcm.channels).is_none() {
        violations.push("pcm.channels", CHANNELS_MSG);
    }

    if ResampleQuality::new(pcm.resampling_quality).is_none() {
        violations.push("pcm.resampling-quality", "allowed values are [0...4]");
    }

    if config.audio.frame_length <= 0 {
        violations.push("audio.frame-length", "value must be > 0");
    }
}

fn check_opus(config: &AppConfig, violations: &mut Violations) {
    let opus = &config.opus;

    if OpusApplication::parse(&opus.application).is_none() {
        violations.push(
            "opus.application",
            "allowed values are VOIP, AUDIO or RESTRICTED_LOWDELAY",
        );
    }

    if OpusBandwidth::parse(&opus.max_bandwidth).is_none() {
        violations.push(
            "opus.max-bandwidth",
            "allowed values are NARROWBAND, MEDIUMBAND, WIDEBAND, SUPERWIDEBAND, FULLBAND",
        );
    }

    if !OPUS_BITRATE_RANGE.contains(&opus.bitrate) {
        violations.push("opus.bitrate", "allowed values are [6000...510000]");
    }

    if !(0..=10).contains(&opus.complexity) {
        violations.push("opus.complexity", "allowed values are [0...10]");
    }

    let duration = config.audio.frame_length as f64 / config.input_device.samplingrate;
    if !OPUS_FRAME_DURATIONS.contains(&duration) {
        violations.push(
            "audio.frame-length",
            "audio.frame-length / input-device.samplingrate must be 2.5, 5, 10, 20, 40 or 60 ms",
        );
    }
}

/// The render path resamples from `wire_rate` to the output device rate.
/// The ratio is only checked when `wire_rate` itself is usable.
fn check_output_rate(config: &AppConfig, wire_rate: f64, violations: &mut Violations) {
    let rate = config.output_device.samplingrate;
    if !rate.is_finite() || rate <= 0.0 {
        violations.push("output-device.samplingrate", "value must be finite and > 0");
    } else if wire_rate.is_finite()
        && wire_rate > 0.0
        && !ratio_within_bounds(rate, wire_rate)
    {
        violations.push(
            "output-device.samplingrate",
            "ratio between output-device & pipeline samplingrate must be within [1/256, 256]",
        );
    }
}

/// Both `a / b` and `b / a` must lie in `[1/256, 256]`. NaN never passes.
fn ratio_within_bounds(a: f64, b: f64) -> bool {
    let bounds = (1.0 / MAX_RESAMPLE_RATIO)..=MAX_RESAMPLE_RATIO;
    bounds.contains(&(a / b)) && bounds.contains(&(b / a))
}
