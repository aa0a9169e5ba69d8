//! Error taxonomy for the detection pipeline.
//!
//! Every variant is recoverable at the session boundary: the session records
//! the message for display and returns the error, it never aborts the process.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    /// Model asset missing or corrupt. Fixed at adapter construction.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Rejected before any model call (threshold out of range, bad upload type, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// File or device could not be opened. Fatal for that source instance only.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Image mode with no upload and no default asset.
    #[error("no frame available")]
    NoFrameAvailable,

    #[error("session is not authenticated")]
    NotAuthenticated,

    /// The model was available but the prediction call failed.
    #[error("inference failed: {0}")]
    Inference(String),
}

impl DetectError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        DetectError::InvalidArgument(msg.into())
    }

    pub(crate) fn source_unavailable(msg: impl Into<String>) -> Self {
        DetectError::SourceUnavailable(msg.into())
    }
}

/// Validate a confidence threshold. NaN is rejected along with values outside `[0, 1]`.
pub fn validate_threshold(threshold: f32) -> Result<f32, DetectError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(DetectError::invalid(format!(
            "confidence threshold must be within [0, 1], got {}",
            threshold
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_bounds_are_inclusive() {
        assert_eq!(validate_threshold(0.0), Ok(0.0));
        assert_eq!(validate_threshold(1.0), Ok(1.0));
        assert!(validate_threshold(-0.01).is_err());
        assert!(validate_threshold(1.01).is_err());
        assert!(validate_threshold(f32::NAN).is_err());
    }

    #[test]
    fn error_display_names_the_cause() {
        let err = DetectError::ModelUnavailable("weights/best.onnx: not found".to_string());
        assert!(err.to_string().contains("model unavailable"));
        assert!(err.to_string().contains("best.onnx"));
        assert_eq!(DetectError::NoFrameAvailable.to_string(), "no frame available");
    }
}
