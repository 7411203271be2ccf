//! Opus packet decoding into 16 bit fixed-point frames, with concealment
//! for lost packets

use opus::Decoder;

use crate::codec::encoder::opus_channels;
use crate::codec::FrameDecoder;
use crate::error::CodecError;
use crate::params::Channels;

/// 120 ms at 48 kHz, the longest frame Opus can decode
const MAX_FRAME_SAMPLES: usize = 5760;

/// Decoder for one receive direction
pub struct OpusDecoder {
    decoder: Decoder,
    channels: usize,
    /// Interleaved samples in one frame; concealment produces exactly this
    frame_samples: usize,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32, channels: Channels, frame_size: usize) -> Result<Self, CodecError> {
        let decoder = Decoder::new(sample_rate, opus_channels(channels))
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;
        let channels = channels.count() as usize;

        Ok(Self {
            decoder,
            channels,
            frame_samples: frame_size.min(MAX_FRAME_SAMPLES) * channels,
            decode_buffer: vec![0; MAX_FRAME_SAMPLES * channels],
        })
    }

    fn decode_into_vec(&mut self, data: &[u8], len: usize) -> Result<Vec<i32>, CodecError> {
        let samples = self
            .decoder
            .decode(data, &mut self.decode_buffer[..len], false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        let total = samples * self.channels;
        Ok(self.decode_buffer[..total].iter().map(|&s| i32::from(s)).collect())
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i32>, CodecError> {
        let len = self.decode_buffer.len();
        self.decode_into_vec(payload, len)
    }

    /// Packet loss concealment for one missing frame
    fn conceal(&mut self) -> Result<Option<Vec<i32>>, CodecError> {
        let len = self.frame_samples;
        self.decode_into_vec(&[], len).map(Some)
    }
}
