//! Error types for event construction and settings handling.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An event could not be encoded or decoded.
    #[error("Event codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A decoded event breaks the stage outcome rules.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Delivery settings failed validation.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_convert() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let core: CoreError = err.into();
        assert!(core.to_string().starts_with("Event codec error"));
    }

    #[test]
    fn invalid_settings_display() {
        let err = CoreError::InvalidSettings("max_queue_size must be at least 1".into());
        assert_eq!(err.to_string(), "Invalid settings: max_queue_size must be at least 1");
    }
}
