//! Error types for the passthrough pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Device-side errors reported by capture sources and playback sinks
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device failure: {0}")]
    DeviceFailure(String),

    #[error("Short read from capture device: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("Device IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame conversion failed: {0}")]
    Codec(#[from] CodecError),
}

/// Sample codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported format: {0} bits per sample (expected 8 or 16)")]
    UnsupportedFormat(u16),

    #[error("Buffer of {len} bytes is not a whole number of {bytes_per_sample}-byte samples")]
    MisalignedBuffer { len: usize, bytes_per_sample: usize },

    #[error("Length mismatch: {samples} samples do not fit {bytes} bytes")]
    LengthMismatch { samples: usize, bytes: usize },
}

/// Processing loop misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("No capture source / playback sink bound")]
    DeviceNotBound,

    #[error("Cannot {action} while {state}")]
    InvalidStateTransition {
        state: &'static str,
        action: &'static str,
    },

    #[error("Processing thread panicked")]
    WorkerPanicked,

    #[error("Frame transform panicked: {0}")]
    TransformPanicked(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err: Error = CodecError::UnsupportedFormat(24).into();
        assert_eq!(
            err.to_string(),
            "Codec error: Unsupported format: 24 bits per sample (expected 8 or 16)"
        );

        let err = PipelineError::InvalidStateTransition {
            state: "running",
            action: "start",
        };
        assert_eq!(err.to_string(), "Cannot start while running");
    }
}
