//! # PCM Passthrough
//!
//! Real-time microphone-to-speaker audio frame pipeline with loudness
//! monitoring.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                   Processing thread (audio::processor)               │
//! │                                                                      │
//! │  ┌──────────────┐   ┌──────────┐   ┌────────────┐   ┌────────────┐   │
//! │  │CaptureSource │──▶│  Decode  │──▶│ AudioFrame │──▶│ Transform  │   │
//! │  │ (mic, file)  │   │ (codec)  │   │  (input)   │   │(passthrough│   │
//! │  └──────────────┘   └──────────┘   └─────┬──────┘   └─────┬──────┘   │
//! │                                          │                │          │
//! │                                          ▼                ▼          │
//! │                                   ┌────────────┐   ┌────────────┐    │
//! │                                   │LevelMeter  │   │ AudioFrame │    │
//! │                                   │ (RMS/dBFS) │   │  (output)  │    │
//! │                                   └────────────┘   └─────┬──────┘    │
//! │                                                          │ clamp     │
//! │  ┌──────────────┐   ┌──────────┐                         │           │
//! │  │PlaybackSink  │◀──│  Encode  │◀────────────────────────┘           │
//! │  │(speaker,file)│   │ (codec)  │                                     │
//! │  └──────────────┘   └──────────┘                                     │
//! │                                                                      │
//! │           copy after each iteration                                  │
//! │                     │                                                │
//! └─────────────────────┼────────────────────────────────────────────────┘
//!                       ▼
//!          ┌───────────────────────────┐
//!          │ MonitorHandle (snapshots, │◀── VU meter, waveform view,
//!          │ bounded input history)    │    spectrum consumers
//!          └───────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Default bit depth
    pub const DEFAULT_BITS_PER_SAMPLE: u16 = 16;

    /// Default frame size in samples (64 ms at 16 kHz)
    pub const DEFAULT_FRAME_SIZE: usize = 1024;

    /// Loudness reported for silent frames, below 16-bit dynamic range
    pub const DBFS_FLOOR: f32 = -120.0;

    /// Default number of input snapshots kept for history consumers
    pub const DEFAULT_HISTORY_FRAMES: usize = 32;
}
