//! Sample codec
//!
//! Converts between raw signed big-endian PCM bytes (8 or 16 bit) and
//! normalized floating-point samples.

pub mod decoder;
pub mod encoder;
pub mod format;

pub use decoder::{decode, decode_into, PcmDecoder};
pub use encoder::{encode, encode_into, PcmEncoder};
pub use format::SampleFormat;
