//! Error types for the image tracking engine.
//!
//! Recognition insufficiency (too few keypoints, too few matches, a degenerate
//! homography) is not an error: those paths return `Ok(None)`. The variants
//! below cover input validation, resource failures and model-state misuse.

use thiserror::Error;

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Errors surfaced by the engine.
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Colorspace {0:?} is not supported for feature extraction")]
    UnsupportedColorspace(crate::source::Colorspace),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Parse error at token {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Tracking model has no valid target")]
    InvalidModel,

    #[error("Tracking model is no longer running")]
    ModelUnavailable,

    #[error("Tracker panicked while processing a frame")]
    TrackerPanicked,

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackingError {
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn parse<S: Into<String>>(position: usize, msg: S) -> Self {
        Self::Parse {
            position,
            message: msg.into(),
        }
    }
}
