//! Opus encoder wrapper

use bytes::Bytes;
use opus::{Application, Bandwidth, Encoder};

use crate::codec::FrameEncoder;
use crate::error::CodecError;
use crate::params::{Channels, OpusApplication, OpusBandwidth, OpusParams};

/// Largest packet libopus produces for one frame
const MAX_PACKET_SIZE: usize = 4000;

/// Opus encoder configured from validated parameters
pub struct OpusEncoder {
    encoder: Encoder,
    /// Interleaved samples in one frame
    frame_samples: usize,
    /// Reused conversion buffer
    pcm_buffer: Vec<i16>,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
}

impl OpusEncoder {
    /// Create an encoder for frames of `frame_size` samples per channel
    pub fn new(
        sample_rate: u32,
        channels: Channels,
        params: &OpusParams,
        frame_size: usize,
    ) -> Result<Self, CodecError> {
        let application = match params.application {
            OpusApplication::RestrictedLowDelay => Application::LowDelay,
            OpusApplication::Voip => Application::Voip,
            OpusApplication::Audio => Application::Audio,
        };

        let mut encoder = Encoder::new(sample_rate, opus_channels(channels), application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(params.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;
        encoder
            .set_complexity(i32::from(params.complexity))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set complexity: {}", e)))?;
        encoder
            .set_max_bandwidth(opus_bandwidth(params.max_bandwidth))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bandwidth: {}", e)))?;

        tracing::debug!(
            "Opus encoder: {} Hz, {:?}, {:?}, {} bit/s, complexity {}, max bandwidth {:?}, {} samples/frame",
            sample_rate,
            channels,
            params.application,
            params.bitrate,
            params.complexity,
            params.max_bandwidth,
            frame_size
        );

        let frame_samples = frame_size * channels.count() as usize;
        Ok(Self {
            encoder,
            frame_samples,
            pcm_buffer: Vec::with_capacity(frame_samples),
            encode_buffer: vec![0u8; MAX_PACKET_SIZE],
        })
    }
}

impl FrameEncoder for OpusEncoder {
    /// Input must hold exactly one frame of interleaved 16 bit samples
    fn encode(&mut self, samples: &[i32]) -> Result<Bytes, CodecError> {
        if samples.len() != self.frame_samples {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        self.pcm_buffer.clear();
        self.pcm_buffer.extend(
            samples
                .iter()
                .map(|&s| s.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16),
        );

        let size = self
            .encoder
            .encode(&self.pcm_buffer, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }
}

pub(crate) fn opus_channels(channels: Channels) -> opus::Channels {
    match channels {
        Channels::Mono => opus::Channels::Mono,
        Channels::Stereo => opus::Channels::Stereo,
    }
}

fn opus_bandwidth(bandwidth: OpusBandwidth) -> Bandwidth {
    match bandwidth {
        OpusBandwidth::Narrowband => Bandwidth::Narrowband,
        OpusBandwidth::Mediumband => Bandwidth::Mediumband,
        OpusBandwidth::Wideband => Bandwidth::Wideband,
        OpusBandwidth::Superwideband => Bandwidth::Superwideband,
        OpusBandwidth::Fullband => Bandwidth::Fullband,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> OpusParams {
        OpusParams {
            application: OpusApplication::RestrictedLowDelay,
            max_bandwidth: OpusBandwidth::Wideband,
            bitrate: 32000,
            complexity: 9,
        }
    }

    #[test]
    fn test_encoder_applies_parameters() {
        let mut encoder = OpusEncoder::new(48000, Channels::Stereo, &params(), 960).unwrap();
        assert_eq!(encoder.frame_samples, 1920);
        assert_eq!(encoder.encoder.get_complexity().unwrap(), 9);
        assert!(matches!(
            encoder.encoder.get_max_bandwidth().unwrap(),
            Bandwidth::Wideband
        ));

        let params = OpusParams {
            complexity: 2,
            max_bandwidth: OpusBandwidth::Narrowband,
            ..params()
        };
        let mut encoder = OpusEncoder::new(16000, Channels::Mono, &params, 320).unwrap();
        assert_eq!(encoder.encoder.get_complexity().unwrap(), 2);
        assert!(matches!(
            encoder.encoder.get_max_bandwidth().unwrap(),
            Bandwidth::Narrowband
        ));
    }

    #[test]
    fn test_unsupported_rate_fails() {
        assert!(matches!(
            OpusEncoder::new(44100, Channels::Mono, &params(), 882),
            Err(CodecError::EncoderInit(_))
        ));
    }

    #[test]
    fn test_encoding() {
        let mut encoder = OpusEncoder::new(48000, Channels::Mono, &params(), 960).unwrap();
        let encoded = encoder.encode(&vec![0; 960]).unwrap();
        assert!(!encoded.is_empty());
        assert!(encoded.len() < 960 * 2);
    }

    #[test]
    fn test_wrong_frame_size() {
        let mut encoder = OpusEncoder::new(48000, Channels::Mono, &params(), 960).unwrap();
        assert!(matches!(
            encoder.encode(&[0; 961]),
            Err(CodecError::InvalidFrameSize(961))
        ));
    }
}
