//! Uncompressed PCM wire format
//!
//! Samples are written as little-endian signed integers using the smallest
//! whole number of bytes for the bit depth. 8 bit audio uses two bytes per
//! sample because its scale spans `[-256, 255]`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{FrameDecoder, FrameEncoder};
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmCodec {
    bit_depth: u32,
    width: usize,
}

impl PcmCodec {
    pub fn new(bit_depth: u32) -> Result<Self, CodecError> {
        let width = match bit_depth {
            8 | 12 | 16 => 2,
            24 => 3,
            32 => 4,
            other => {
                return Err(CodecError::EncoderInit(format!(
                    "Unsupported PCM bit depth: {}",
                    other
                )))
            }
        };
        Ok(Self { bit_depth, width })
    }

    pub fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    /// Bytes per sample on the wire
    pub fn width(&self) -> usize {
        self.width
    }
}

impl FrameEncoder for PcmCodec {
    fn encode(&mut self, samples: &[i32]) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::with_capacity(samples.len() * self.width);
        for &sample in samples {
            out.put_slice(&sample.to_le_bytes()[..self.width]);
        }
        Ok(out.freeze())
    }
}

impl FrameDecoder for PcmCodec {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i32>, CodecError> {
        if payload.len() % self.width != 0 {
            return Err(CodecError::DecodingFailed(format!(
                "payload of {} bytes is not a multiple of {}",
                payload.len(),
                self.width
            )));
        }

        let shift = 32 - 8 * self.width as u32;
        Ok(payload
            .chunks_exact(self.width)
            .map(|bytes| {
                let mut word = [0u8; 4];
                word[..self.width].copy_from_slice(bytes);
                // Sign-extend from the sample width
                (i32::from_le_bytes(word) << shift) >> shift
            })
            .collect())
    }
}
