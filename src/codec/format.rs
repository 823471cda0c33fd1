//! PCM sample formats understood by the codec

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Signed, big-endian, mono PCM layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 8-bit signed
    Pcm8,
    /// 16-bit signed, big-endian
    Pcm16,
}

impl SampleFormat {
    /// Resolve a bit depth, rejecting anything other than 8 or 16
    pub fn from_bits(bits_per_sample: u16) -> Result<Self, CodecError> {
        match bits_per_sample {
            8 => Ok(Self::Pcm8),
            16 => Ok(Self::Pcm16),
            other => Err(CodecError::UnsupportedFormat(other)),
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            Self::Pcm8 => 8,
            Self::Pcm16 => 16,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        self.bits() as usize / 8
    }

    /// Divisor applied when decoding raw integers into floats.
    ///
    /// 8-bit uses 127 (the hardware convention, so -128 decodes slightly
    /// below -1.0); 16-bit uses 32768.
    pub fn decode_scale(self) -> f64 {
        match self {
            Self::Pcm8 => 127.0,
            Self::Pcm16 => 32768.0,
        }
    }

    /// Multiplier applied when encoding floats into raw integers
    pub fn encode_scale(self) -> f64 {
        match self {
            Self::Pcm8 => i8::MAX as f64,
            Self::Pcm16 => i16::MAX as f64,
        }
    }

    /// Size of one quantization step in the normalized domain
    pub fn quantization_step(self) -> f64 {
        1.0 / self.decode_scale()
    }
}

impl TryFrom<u16> for SampleFormat {
    type Error = CodecError;

    fn try_from(bits: u16) -> Result<Self, Self::Error> {
        Self::from_bits(bits)
    }
}
