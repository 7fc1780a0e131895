//! Error types for the DCGAN training pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or short batch; aborts the run
    #[error("Malformed batch at epoch {epoch}, step {step}: {reason}")]
    Data {
        epoch: usize,
        step: usize,
        reason: String,
    },

    /// Too few samples to estimate a covariance; skips one evaluation pair
    #[error("Insufficient samples for distance estimate (real={real}, fake={fake}), need at least 2 on each side")]
    InsufficientSamples { real: usize, fake: usize },

    /// Evaluation could not be completed
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    /// Checkpoint could not be written; fatal at the epoch boundary
    #[error("Failed to write checkpoint for epoch {epoch}: {reason}")]
    CheckpointWrite { epoch: usize, reason: String },

    /// Checkpoint failed its integrity check on load
    #[error("Corrupt checkpoint at {path}: {reason}")]
    CheckpointCorrupt { path: PathBuf, reason: String },

    /// No valid checkpoint exists
    #[error("No valid checkpoint found in {0}")]
    CheckpointNotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Tensor backend error
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Whether the loop may continue after this error.
    ///
    /// Only an under-sampled evaluation pair is recoverable; everything else
    /// either aborts the run or, inside evaluation, skips the epoch's scoring.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::InsufficientSamples { .. })
    }

    /// Whether this error must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Data { .. } | Error::CheckpointWrite { .. })
    }

    pub(crate) fn data(epoch: usize, step: usize, reason: impl Into<String>) -> Self {
        Error::Data {
            epoch,
            step,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CheckpointCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let skip = Error::InsufficientSamples { real: 1, fake: 4 };
        assert!(skip.is_recoverable());
        assert!(!skip.is_fatal());

        let data = Error::data(2, 17, "expected 4 samples, got 3");
        assert!(data.is_fatal());
        assert!(!data.is_recoverable());
        assert_eq!(
            data.to_string(),
            "Malformed batch at epoch 2, step 17: expected 4 samples, got 3"
        );

        let write = Error::CheckpointWrite {
            epoch: 3,
            reason: "disk full".to_string(),
        };
        assert!(write.is_fatal());

        let corrupt = Error::corrupt("/tmp/ckpt", "checksum mismatch");
        assert!(!corrupt.is_fatal());
        assert!(!corrupt.is_recoverable());
    }
}
