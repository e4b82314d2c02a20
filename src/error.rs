//! Error taxonomy for the voting and export stages
//!
//! Every failure is deterministic: nothing here is retried. The pipeline
//! wraps errors in [`SubjectError`] so batch reports always name the subject.

use std::path::PathBuf;

/// Errors raised by the core
#[derive(Debug, thiserror::Error)]
pub enum SegError {
    /// Malformed or mismatched inputs (grid mismatch, bad label set, ...)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing input file or unwritable output
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File exists but is not a usable NIfTI volume
    #[error("invalid NIfTI file '{}': {message}", path.display())]
    Nifti { path: PathBuf, message: String },

    /// A categorical volume was about to be resampled with a blending kernel
    #[error("interpolation policy violation: {0}")]
    InterpolationPolicy(String),

    /// Malformed or singular affine transform
    #[error("invalid transform: {0}")]
    Transform(String),

    /// Study configuration could not be parsed or validated
    #[error("invalid study configuration: {0}")]
    Config(String),
}

impl SegError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SegError::Io { path: path.into(), source }
    }

    pub(crate) fn nifti(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SegError::Nifti { path: path.into(), message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, SegError>;

/// A [`SegError`] tagged with the subject it happened to
#[derive(Debug, thiserror::Error)]
#[error("subject '{subject}': {source}")]
pub struct SubjectError {
    pub subject: String,
    #[source]
    pub source: SegError,
}

impl SubjectError {
    pub fn new(subject: impl Into<String>, source: SegError) -> Self {
        SubjectError { subject: subject.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_error_names_subject() {
        let err = SubjectError::new("sub-01", SegError::Configuration("expected 7 volumes, got 6".into()));
        let msg = err.to_string();
        assert!(msg.contains("sub-01"), "message should name subject: {}", msg);
        assert!(msg.contains("expected 7 volumes"), "message should keep cause: {}", msg);
    }

    #[test]
    fn test_io_error_mentions_path() {
        let err = SegError::io(
            "/tmp/missing.nii",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert!(err.to_string().contains("/tmp/missing.nii"));
    }
}
