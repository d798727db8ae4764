//! # Error types

use crate::frame::FrameDims;

/// Stabilizer error.
///
/// Errors are split into recoverable and fatal ones. Recoverable errors are absorbed by the
/// pipeline (the offending frame is degraded), while fatal errors halt the pipeline until it is
/// reset. Use [`Error::is_fatal`] to classify.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Not enough correspondences to fit a motion model.
    #[error("insufficient motion data: {found} correspondences, {required} required")]
    InsufficientMotionData { found: usize, required: usize },

    /// Invalid configuration or an unsupported change in the input stream.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Frame buffer and trajectory fell out of sync.
    #[error("buffer invariant violated: {0}")]
    BufferInvariantViolation(String),

    /// The pipeline stopped after an earlier fatal error.
    #[error("pipeline halted after a fatal error, reset it to continue")]
    Halted,
}

impl Error {
    /// Whether the error must stop the pipeline.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InsufficientMotionData { .. })
    }

    pub(crate) fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::InvalidValue {
            field,
            reason: reason.into(),
        })
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::BufferInvariantViolation(msg.into())
    }
}

/// Fatal configuration problems.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    /// Frame dimensions changed mid-stream.
    #[error("frame is {found}, but the stream started with {expected}")]
    DimensionMismatch {
        expected: FrameDims,
        found: FrameDims,
    },

    /// A configuration value is out of range.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Pixel buffer does not match the declared frame layout.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Result type alias using the stabilizer [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let insufficient = Error::InsufficientMotionData {
            found: 2,
            required: 4,
        };
        assert!(!insufficient.is_fatal());
        assert!(Error::invalid_value("smoothing_radius", "must be positive").is_fatal());
        assert!(Error::invariant("oops").is_fatal());
        assert!(Error::Halted.is_fatal());
    }

    #[test]
    fn dimension_mismatch_message() {
        let err: Error = ConfigurationError::DimensionMismatch {
            expected: FrameDims {
                width: 320,
                height: 240,
                channels: 3,
            },
            found: FrameDims {
                width: 640,
                height: 480,
                channels: 3,
            },
        }
        .into();

        assert_eq!(
            err.to_string(),
            "configuration error: frame is 640x480x3, but the stream started with 320x240x3"
        );
    }
}
