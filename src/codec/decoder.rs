//! PCM decoder
//!
//! Turns raw big-endian signed PCM bytes into normalized `f32` samples.

use crate::codec::SampleFormat;
use crate::error::CodecError;

/// Decode `bytes` into a freshly allocated sample vector
pub fn decode(bytes: &[u8], bits_per_sample: u16) -> Result<Vec<f32>, CodecError> {
    let format = SampleFormat::from_bits(bits_per_sample)?;
    let bps = format.bytes_per_sample();
    if bytes.len() % bps != 0 {
        return Err(CodecError::MisalignedBuffer {
            len: bytes.len(),
            bytes_per_sample: bps,
        });
    }

    let mut samples = vec![0.0f32; bytes.len() / bps];
    decode_into(format, bytes, &mut samples)?;
    Ok(samples)
}

/// Decode into an existing buffer; `out.len()` samples must span exactly `bytes`
pub fn decode_into(format: SampleFormat, bytes: &[u8], out: &mut [f32]) -> Result<(), CodecError> {
    if out.len() * format.bytes_per_sample() != bytes.len() {
        return Err(CodecError::LengthMismatch {
            samples: out.len(),
            bytes: bytes.len(),
        });
    }

    let scale = format.decode_scale();
    match format {
        SampleFormat::Pcm8 => {
            for (sample, &byte) in out.iter_mut().zip(bytes) {
                *sample = (byte as i8 as f64 / scale) as f32;
            }
        }
        SampleFormat::Pcm16 => {
            for (sample, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                let raw = i16::from_be_bytes([pair[0], pair[1]]);
                *sample = (raw as f64 / scale) as f32;
            }
        }
    }

    Ok(())
}

/// Stateful decoder bound to one format, with statistics
pub struct PcmDecoder {
    format: SampleFormat,
    /// Frames decoded
    frames_decoded: u64,
    /// Total samples produced
    samples_produced: u64,
}

impl PcmDecoder {
    pub fn new(format: SampleFormat) -> Self {
        Self {
            format,
            frames_decoded: 0,
            samples_produced: 0,
        }
    }

    /// Decode one frame of bytes into `out`
    pub fn decode_frame(&mut self, bytes: &[u8], out: &mut [f32]) -> Result<(), CodecError> {
        decode_into(self.format, bytes, out)?;
        self.frames_decoded += 1;
        self.samples_produced += out.len() as u64;
        Ok(())
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            samples_produced: self.samples_produced,
        }
    }

    pub fn reset_stats(&mut self) {
        self.frames_decoded = 0;
        self.samples_produced = 0;
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub samples_produced: u64,
}
