//! Codecs turning fixed-point frames into wire payloads and back
//!
//! Two codecs are supported: uncompressed PCM and Opus. Both work on
//! interleaved fixed-point samples at the pipeline bit depth (Opus is
//! always 16 bit) and are selected from the validated parameters.

pub mod decoder;
pub mod encoder;
pub mod pcm;

use bytes::Bytes;

use crate::error::CodecError;
use crate::params::{CodecParams, PipelineParameters};

pub use decoder::OpusDecoder;
pub use encoder::OpusEncoder;
pub use pcm::PcmCodec;

/// Encodes one frame of fixed-point samples into a payload
pub trait FrameEncoder: Send {
    fn encode(&mut self, samples: &[i32]) -> Result<Bytes, CodecError>;
}

/// Decodes one payload into fixed-point samples
pub trait FrameDecoder: Send {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i32>, CodecError>;

    /// Synthesize one frame in place of a lost packet, if the codec can
    fn conceal(&mut self) -> Result<Option<Vec<i32>>, CodecError> {
        Ok(None)
    }
}

/// Create the encoder selected by `params`
pub fn build_encoder(params: &PipelineParameters) -> Result<Box<dyn FrameEncoder>, CodecError> {
    match &params.codec {
        CodecParams::Pcm(pcm) => Ok(Box::new(PcmCodec::new(pcm.bit_depth)?)),
        CodecParams::Opus(opus) => Ok(Box::new(OpusEncoder::new(
            params.wire_rate() as u32,
            params.wire_channels(),
            opus,
            params.frame_length,
        )?)),
    }
}

/// Create the decoder selected by `params`
pub fn build_decoder(params: &PipelineParameters) -> Result<Box<dyn FrameDecoder>, CodecError> {
    match &params.codec {
        CodecParams::Pcm(pcm) => Ok(Box::new(PcmCodec::new(pcm.bit_depth)?)),
        CodecParams::Opus(_) => Ok(Box::new(OpusDecoder::new(
            params.wire_rate() as u32,
            params.wire_channels(),
            params.frame_length,
        )?)),
    }
}
