//! PCM encoder
//!
//! Maps normalized samples back to big-endian signed PCM. Samples are
//! expected to already lie in [-1.0, 1.0]; the encoder does not clamp.

use crate::codec::SampleFormat;
use crate::error::CodecError;

/// Encode `samples` into a freshly allocated byte vector
pub fn encode(samples: &[f32], bits_per_sample: u16) -> Result<Vec<u8>, CodecError> {
    let format = SampleFormat::from_bits(bits_per_sample)?;
    let mut bytes = vec![0u8; samples.len() * format.bytes_per_sample()];
    encode_into(format, samples, &mut bytes)?;
    Ok(bytes)
}

/// Encode into an existing byte buffer sized exactly for `samples`
pub fn encode_into(format: SampleFormat, samples: &[f32], out: &mut [u8]) -> Result<(), CodecError> {
    if samples.len() * format.bytes_per_sample() != out.len() {
        return Err(CodecError::LengthMismatch {
            samples: samples.len(),
            bytes: out.len(),
        });
    }

    let scale = format.encode_scale();
    match format {
        SampleFormat::Pcm8 => {
            for (byte, &sample) in out.iter_mut().zip(samples) {
                *byte = ((sample as f64 * scale).round() as i8) as u8;
            }
        }
        SampleFormat::Pcm16 => {
            for (pair, &sample) in out.chunks_exact_mut(2).zip(samples) {
                let raw = (sample as f64 * scale).round() as i16;
                pair.copy_from_slice(&raw.to_be_bytes());
            }
        }
    }

    Ok(())
}

/// Stateful encoder with a reusable output buffer
pub struct PcmEncoder {
    format: SampleFormat,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl PcmEncoder {
    /// Create an encoder whose buffer is pre-sized for `frame_size` samples
    pub fn new(format: SampleFormat, frame_size: usize) -> Self {
        Self {
            format,
            encode_buffer: vec![0u8; frame_size * format.bytes_per_sample()],
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode one frame, returning a view of the internal buffer
    pub fn encode_frame(&mut self, samples: &[f32]) -> Result<&[u8], CodecError> {
        let len = samples.len() * self.format.bytes_per_sample();
        self.encode_buffer.resize(len, 0);
        encode_into(self.format, samples, &mut self.encode_buffer)?;

        self.frames_encoded += 1;
        self.bytes_produced += len as u64;

        Ok(&self.encode_buffer)
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }

    pub fn reset_stats(&mut self) {
        self.frames_encoded = 0;
        self.bytes_produced = 0;
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}
