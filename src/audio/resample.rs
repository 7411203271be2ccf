//! Streaming sample rate conversion
//!
//! A [`RateConverter`] is owned by one pipeline direction and keeps its
//! filter state between calls, so consecutive frames continue the same
//! waveform. Input of any length is accepted; samples that do not fill a
//! whole resampler chunk are held back until the next call.

use rubato::{
    FastFixedIn, PolynomialDegree, ResampleError, Resampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::AudioError;
use crate::params::{Channels, ResampleQuality, MAX_RESAMPLE_RATIO};

enum Engine {
    Fast(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
}

impl Engine {
    fn build(
        ratio: f64,
        quality: ResampleQuality,
        chunk_frames: usize,
        channels: usize,
    ) -> Result<Self, AudioError> {
        let polynomial = |degree| {
            FastFixedIn::new(ratio, 1.0, degree, chunk_frames, channels)
                .map(Engine::Fast)
                .map_err(|e| AudioError::Resample(e.to_string()))
        };
        let sinc = |sinc_len, oversampling_factor, interpolation| {
            let params = SincInterpolationParameters {
                sinc_len,
                f_cutoff: 0.95,
                oversampling_factor,
                interpolation,
                window: WindowFunction::BlackmanHarris2,
            };
            SincFixedIn::new(ratio, 1.0, params, chunk_frames, channels)
                .map(Engine::Sinc)
                .map_err(|e| AudioError::Resample(e.to_string()))
        };

        match quality.level() {
            0 => polynomial(PolynomialDegree::Linear),
            1 => polynomial(PolynomialDegree::Cubic),
            2 => polynomial(PolynomialDegree::Quintic),
            3 => sinc(64, 128, SincInterpolationType::Linear),
            _ => sinc(256, 256, SincInterpolationType::Cubic),
        }
    }

    fn input_frames_next(&self) -> usize {
        match self {
            Engine::Fast(r) => r.input_frames_next(),
            Engine::Sinc(r) => r.input_frames_next(),
        }
    }

    fn process(&mut self, input: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ResampleError> {
        match self {
            Engine::Fast(r) => r.process(input, None),
            Engine::Sinc(r) => r.process(input, None),
        }
    }

    fn reset(&mut self) {
        match self {
            Engine::Fast(r) => r.reset(),
            Engine::Sinc(r) => r.reset(),
        }
    }
}

/// Stateful resampler for interleaved audio
pub struct RateConverter {
    engine: Option<Engine>,
    from_rate: f64,
    to_rate: f64,
    channels: usize,
    /// Deinterleaved input waiting for a full chunk
    pending: Vec<Vec<f32>>,
    chunk: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a converter from `from_rate` to `to_rate`.
    ///
    /// `chunk_frames` is the number of frames (per channel) handed to the
    /// resampler at once; use the typical input frame length. Equal rates
    /// produce a passthrough converter.
    pub fn new(
        from_rate: f64,
        to_rate: f64,
        channels: Channels,
        quality: ResampleQuality,
        chunk_frames: usize,
    ) -> Result<Self, AudioError> {
        let ratio = to_rate / from_rate;
        if !ratio.is_finite() || !(1.0 / MAX_RESAMPLE_RATIO..=MAX_RESAMPLE_RATIO).contains(&ratio) {
            return Err(AudioError::Resample(format!(
                "cannot convert {} Hz to {} Hz",
                from_rate, to_rate
            )));
        }

        let channels = channels.count() as usize;
        let engine = if from_rate == to_rate {
            None
        } else {
            Some(Engine::build(
                ratio,
                quality,
                chunk_frames.max(1),
                channels,
            )?)
        };

        tracing::debug!(
            "Rate converter {}Hz -> {}Hz, {} channel(s), quality {}",
            from_rate,
            to_rate,
            channels,
            quality.level()
        );

        Ok(Self {
            engine,
            from_rate,
            to_rate,
            channels,
            pending: vec![Vec::with_capacity(chunk_frames * 2); channels],
            chunk: vec![Vec::with_capacity(chunk_frames); channels],
        })
    }

    /// Resample interleaved `input`, returning all output that is ready
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, AudioError> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(input.to_vec());
        };

        for frame in input.chunks_exact(self.channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                self.pending[ch].push(sample);
            }
        }

        let mut output = Vec::new();
        loop {
            let needed = engine.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }

            for (chunk, pending) in self.chunk.iter_mut().zip(self.pending.iter_mut()) {
                chunk.clear();
                chunk.extend(pending.drain(..needed));
            }

            let resampled = engine
                .process(&self.chunk)
                .map_err(|e| AudioError::Resample(e.to_string()))?;

            let frames = resampled.first().map(|c| c.len()).unwrap_or(0);
            output.reserve(frames * self.channels);
            for i in 0..frames {
                for channel in &resampled {
                    output.push(channel[i]);
                }
            }
        }

        Ok(output)
    }

    /// Drop buffered input and filter history
    pub fn reset(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.reset();
        }
        for pending in &mut self.pending {
            pending.clear();
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.engine.is_none()
    }

    /// Output rate divided by input rate
    pub fn ratio(&self) -> f64 {
        self.to_rate / self.from_rate
    }

    /// Frames (per channel) held back waiting for a full chunk
    pub fn buffered_frames(&self) -> usize {
        self.pending[0].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, rate: f64, freq: f64, channels: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let v = (0.5 * (2.0 * std::f64::consts::PI * freq * i as f64 / rate).sin()) as f32;
                std::iter::repeat(v).take(channels)
            })
            .collect()
    }

    #[test]
    fn test_passthrough() {
        let mut rc = RateConverter::new(
            48000.0,
            48000.0,
            Channels::Stereo,
            ResampleQuality::default(),
            960,
        )
        .unwrap();
        assert!(rc.is_passthrough());
        let input = sine(100, 48000.0, 440.0, 2);
        assert_eq!(rc.process(&input).unwrap(), input);
    }

    #[test]
    fn test_unusable_rates_are_rejected() {
        for to_rate in [f64::NAN, f64::INFINITY, 1.0e9, 0.0, -48000.0, 48000.0 / 257.0] {
            let result = RateConverter::new(
                48000.0,
                to_rate,
                Channels::Stereo,
                ResampleQuality::default(),
                960,
            );
            assert!(
                matches!(result, Err(AudioError::Resample(_))),
                "rate {} accepted",
                to_rate
            );
        }

        assert!(RateConverter::new(48000.0, 48000.0 * 256.0, Channels::Mono, ResampleQuality::FASTEST, 960).is_ok());
    }

    #[test]
    fn test_downsample_length() {
        let mut rc =
            RateConverter::new(48000.0, 16000.0, Channels::Mono, ResampleQuality::FASTEST, 960)
                .unwrap();
        assert!((rc.ratio() - 1.0 / 3.0).abs() < 1e-12);

        let mut total = 0;
        for _ in 0..10 {
            total += rc.process(&sine(960, 48000.0, 440.0, 1)).unwrap().len();
        }
        assert!((total as i64 - 3200).abs() <= 4, "got {} frames", total);
    }

    #[test]
    fn test_partial_input_is_held_back() {
        let mut rc =
            RateConverter::new(16000.0, 48000.0, Channels::Stereo, ResampleQuality::default(), 320)
                .unwrap();

        let out = rc.process(&sine(100, 16000.0, 440.0, 2)).unwrap();
        assert!(out.is_empty());
        assert_eq!(rc.buffered_frames(), 100);

        let out = rc.process(&sine(220, 16000.0, 440.0, 2)).unwrap();
        assert!(!out.is_empty());
        assert_eq!(out.len() % 2, 0);
        assert_eq!(rc.buffered_frames(), 0);
    }

    #[test]
    fn test_streaming_matches_single_call() {
        for level in 0..=4 {
            let quality = ResampleQuality::new(level).unwrap();
            let signal = sine(4800, 48000.0, 1000.0, 1);

            let mut whole = RateConverter::new(48000.0, 8000.0, Channels::Mono, quality, 480).unwrap();
            let expected = whole.process(&signal).unwrap();

            let mut pieces = RateConverter::new(48000.0, 8000.0, Channels::Mono, quality, 480).unwrap();
            let mut streamed = Vec::new();
            for part in signal.chunks(333) {
                streamed.extend(pieces.process(part).unwrap());
            }

            assert_eq!(streamed, expected, "quality {}", level);
        }
    }

    #[test]
    fn test_no_discontinuity_between_frames() {
        for quality in [ResampleQuality::FASTEST, ResampleQuality::BEST] {
            let mut rc = RateConverter::new(48000.0, 16000.0, Channels::Mono, quality, 960).unwrap();
            let signal = sine(960 * 20, 48000.0, 440.0, 1);

            let mut out = Vec::new();
            for frame in signal.chunks(960) {
                out.extend(rc.process(frame).unwrap());
            }

            let max_step = out
                .windows(2)
                .map(|w| (w[1] - w[0]).abs())
                .fold(0.0f32, f32::max);
            assert!(max_step < 0.15, "max step {} at quality {:?}", max_step, quality);
        }
    }

    #[test]
    fn test_reset_clears_pending() {
        let mut rc =
            RateConverter::new(44100.0, 48000.0, Channels::Mono, ResampleQuality::default(), 441)
                .unwrap();
        rc.process(&[0.1; 100]).unwrap();
        assert_eq!(rc.buffered_frames(), 100);
        rc.reset();
        assert_eq!(rc.buffered_frames(), 0);
    }
}
