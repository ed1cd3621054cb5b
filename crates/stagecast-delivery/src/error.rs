//! Error types for stage event delivery.
//!
//! The transport classifies every failure into a closed set of variants so
//! the retry engine can branch on the classification rather than on where
//! the error came from.

use std::fmt;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Classified delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network-level failure: connection refused, DNS, reset, body read.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// The request did not complete in time.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Timeout that elapsed, in seconds
        timeout_seconds: u64,
    },

    /// The collector answered with a status outside `200..300`.
    #[error("unexpected HTTP status {status_code}")]
    UnexpectedStatus {
        /// HTTP status code returned by the collector
        status_code: u16,
    },

    /// No endpoint is configured; nothing was sent.
    #[error("delivery disabled: no endpoint configured")]
    Disabled,

    /// The event could not be encoded.
    #[error("failed to encode event: {message}")]
    Serialization {
        /// Encoder error message
        message: String,
    },

    /// The HTTP client could not be built from the settings.
    #[error("invalid transport configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an unexpected status error.
    pub fn unexpected_status(status_code: u16) -> Self {
        Self::UnexpectedStatus { status_code }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Whether another attempt may succeed.
    ///
    /// Every status outside `2xx` is retried, client errors included: the
    /// collector may be mid-deploy or behind a proxy returning transient 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } | Self::UnexpectedStatus { .. } => {
                true
            },
            Self::Disabled | Self::Serialization { .. } | Self::ConfigurationError { .. } => false,
        }
    }

    /// HTTP status carried by the error, if the collector answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status_code } => Some(*status_code),
            _ => None,
        }
    }
}

/// Category of delivery error for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// Collector answered with a non-success status.
    Status,
    /// Delivery switched off.
    Disabled,
    /// Event encoding.
    Encoding,
    /// Transport configuration.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::UnexpectedStatus { .. } => Self::Status,
            DeliveryError::Disabled => Self::Disabled,
            DeliveryError::Serialization { .. } => Self::Encoding,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Status => write!(f, "status"),
            Self::Disabled => write!(f, "disabled"),
            Self::Encoding => write!(f, "encoding"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(30).is_retryable());
        assert!(DeliveryError::unexpected_status(500).is_retryable());
        assert!(DeliveryError::unexpected_status(404).is_retryable());

        assert!(!DeliveryError::Disabled.is_retryable());
        assert!(!DeliveryError::serialization("bad float").is_retryable());
        assert!(!DeliveryError::configuration("tls backend").is_retryable());
    }

    #[test]
    fn status_code_extracted() {
        assert_eq!(DeliveryError::unexpected_status(503).status_code(), Some(503));
        assert_eq!(DeliveryError::timeout(5).status_code(), None);
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("x")), ErrorCategory::Network);
        assert_eq!(ErrorCategory::from(&DeliveryError::timeout(1)), ErrorCategory::Network);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::unexpected_status(500)),
            ErrorCategory::Status
        );
        assert_eq!(ErrorCategory::from(&DeliveryError::Disabled), ErrorCategory::Disabled);
        assert_eq!(ErrorCategory::Status.to_string(), "status");
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(30).to_string(), "request timeout after 30s");
        assert_eq!(
            DeliveryError::unexpected_status(500).to_string(),
            "unexpected HTTP status 500"
        );
    }
}
