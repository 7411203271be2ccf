//! Sample format and channel conversion
//!
//! Device buffers carry `f32` samples in `[-1.0, 1.0]`; the pipeline carries
//! fixed-point samples (stored in `i32`) at the configured bit depth.
//!
//! The two directions use different scale factors, following the usual PCM
//! convention: float to int multiplies by the full positive scale
//! (`2^(n-1) - 1`, and 255 for 8 bit), int to float divides by the power of
//! two (`2^(n-1)`, and 256 for 8 bit). A round trip int → float → int is
//! therefore exact to within one LSB.

use crate::params::Channels;

/// Fixed-point sample converter for one bit depth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatConverter {
    bit_depth: u32,
    to_int: f64,
    to_float: f64,
}

impl FormatConverter {
    /// Create a converter for `bit_depth`, or `None` for an unsupported depth
    pub fn new(bit_depth: u32) -> Option<Self> {
        let (to_int, to_float) = match bit_depth {
            8 => (255.0, 256.0),
            12 => (2047.0, 2048.0),
            16 => (32767.0, 32768.0),
            24 => (8_388_607.0, 8_388_608.0),
            32 => (2_147_483_647.0, 2_147_483_648.0),
            _ => return None,
        };
        Some(Self {
            bit_depth,
            to_int,
            to_float,
        })
    }

    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    /// Smallest representable sample
    pub fn min_value(&self) -> i32 {
        (-self.to_float) as i32
    }

    /// Largest representable sample
    pub fn max_value(&self) -> i32 {
        self.to_int as i32
    }

    #[inline]
    pub fn sample_to_int(&self, sample: f64) -> i32 {
        (sample * self.to_int)
            .round()
            .clamp(f64::from(self.min_value()), f64::from(self.max_value())) as i32
    }

    #[inline]
    pub fn sample_to_float(&self, sample: i32) -> f64 {
        f64::from(sample) / self.to_float
    }

    /// Convert device samples to fixed point, appending to `out`
    pub fn quantize(&self, samples: &[f32], out: &mut Vec<i32>) {
        out.reserve(samples.len());
        out.extend(samples.iter().map(|&s| self.sample_to_int(f64::from(s))));
    }

    /// Convert fixed-point samples to device floats, appending to `out`
    pub fn dequantize(&self, samples: &[i32], out: &mut Vec<f32>) {
        out.reserve(samples.len());
        out.extend(samples.iter().map(|&s| self.sample_to_float(s) as f32));
    }
}

/// Adapt interleaved samples from one channel layout to another.
///
/// Mono to stereo duplicates each sample; stereo to mono averages pairs.
pub fn remix(samples: &[f32], from: Channels, to: Channels) -> Vec<f32> {
    match (from, to) {
        (Channels::Mono, Channels::Stereo) => samples.iter().flat_map(|&s| [s, s]).collect(),
        (Channels::Stereo, Channels::Mono) => samples
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) * 0.5)
            .collect(),
        _ => samples.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DEPTHS: [u32; 5] = [8, 12, 16, 24, 32];

    #[test]
    fn test_unsupported_depths() {
        for depth in [0, 1, 7, 9, 20, 31, 33, 64] {
            assert!(FormatConverter::new(depth).is_none(), "depth {}", depth);
        }
    }

    #[test]
    fn test_scale_factors_are_asymmetric() {
        let c = FormatConverter::new(16).unwrap();
        assert_eq!(c.sample_to_int(1.0), 32767);
        assert_eq!(c.sample_to_int(-1.0), -32767);
        assert_eq!(c.sample_to_float(-32768), -1.0);
        assert!((c.sample_to_float(32767) - 0.999_969).abs() < 1e-6);

        let c = FormatConverter::new(8).unwrap();
        assert_eq!(c.sample_to_int(1.0), 255);
        assert_eq!(c.sample_to_float(256), 1.0);

        let c = FormatConverter::new(32).unwrap();
        assert_eq!(c.sample_to_int(1.0), i32::MAX);
        assert_eq!(c.sample_to_int(-1.0), -i32::MAX);
        assert_eq!(c.sample_to_float(i32::MIN), -1.0);
    }

    #[test]
    fn test_clamping() {
        for depth in DEPTHS {
            let c = FormatConverter::new(depth).unwrap();
            assert_eq!(c.sample_to_int(4.0), c.max_value());
            assert_eq!(c.sample_to_int(-4.0), c.min_value());
        }
        assert_eq!(FormatConverter::new(16).unwrap().min_value(), -32768);
        assert_eq!(FormatConverter::new(32).unwrap().min_value(), i32::MIN);
    }

    #[test]
    fn test_slice_conversion() {
        let c = FormatConverter::new(16).unwrap();
        let mut ints = Vec::new();
        c.quantize(&[0.0, 0.5, -0.5, 1.0], &mut ints);
        assert_eq!(ints, vec![0, 16384, -16384, 32767]);

        let mut floats = Vec::new();
        c.dequantize(&ints, &mut floats);
        assert_eq!(floats[0], 0.0);
        assert_eq!(floats[1], 0.5);
        assert_eq!(floats[2], -0.5);
    }

    #[test]
    fn test_remix() {
        assert_eq!(
            remix(&[0.1, 0.2], Channels::Mono, Channels::Stereo),
            vec![0.1, 0.1, 0.2, 0.2]
        );
        assert_eq!(
            remix(&[0.25, 0.75, -1.0, 1.0], Channels::Stereo, Channels::Mono),
            vec![0.5, 0.0]
        );
        assert_eq!(remix(&[0.5], Channels::Mono, Channels::Mono), vec![0.5]);
    }

    proptest! {
        #[test]
        fn prop_int_float_int_within_one_lsb(depth_idx in 0usize..5, raw in any::<i32>()) {
            let c = FormatConverter::new(DEPTHS[depth_idx]).unwrap();
            let span = i64::from(c.max_value()) - i64::from(c.min_value()) + 1;
            let sample = (i64::from(c.min_value()) + (i64::from(raw) - i64::from(i32::MIN)) % span) as i32;

            let back = c.sample_to_int(c.sample_to_float(sample));
            prop_assert!((i64::from(back) - i64::from(sample)).abs() <= 1,
                "depth {} sample {} came back as {}", c.bit_depth(), sample, back);
        }

        #[test]
        fn prop_float_stays_in_range(depth_idx in 0usize..5, sample in -1.0f64..=1.0) {
            let c = FormatConverter::new(DEPTHS[depth_idx]).unwrap();
            let int = c.sample_to_int(sample);
            prop_assert!(int >= c.min_value() && int <= c.max_value());
            prop_assert!(c.sample_to_float(int).abs() <= 1.0);
        }
    }
}
