//! Domain-specific error types for posture-monitor

use thiserror::Error;

/// Crate-level error type. Per-check failures never surface here; they are
/// converted into error verdicts inside the check cycle.
#[derive(Error, Debug)]
pub enum PostureError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Camera error: {message}")]
    Camera { message: String },

    #[error("Inference service error: {message}")]
    Inference { message: String },

    #[error("Control surface error: {message}")]
    Control { message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<toml::de::Error> for PostureError {
    fn from(err: toml::de::Error) -> Self {
        PostureError::Config {
            message: format!("Invalid TOML: {}", err),
        }
    }
}

impl From<reqwest::Error> for PostureError {
    fn from(err: reqwest::Error) -> Self {
        PostureError::Inference {
            message: format!("HTTP client error: {}", err),
        }
    }
}

impl From<std::io::Error> for PostureError {
    fn from(err: std::io::Error) -> Self {
        PostureError::Internal {
            message: format!("I/O error: {}", err),
        }
    }
}

/// Result type alias for posture-monitor operations
pub type Result<T> = std::result::Result<T, PostureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_operation() {
        let err = PostureError::Timeout {
            operation: "analysis".to_string(),
            timeout_ms: 45_000,
        };
        assert_eq!(
            err.to_string(),
            "Timeout error: analysis timed out after 45000ms"
        );
    }

    #[test]
    fn toml_errors_become_config_errors() {
        let err: PostureError = toml::from_str::<toml::Value>("= nope")
            .unwrap_err()
            .into();
        assert!(matches!(err, PostureError::Config { .. }));
    }

    #[test]
    fn io_errors_are_internal() {
        let err: PostureError = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken").into();
        assert!(matches!(err, PostureError::Internal { .. }));
        assert!(err.to_string().contains("taken"));
    }

    #[test]
    fn reqwest_errors_are_inference_errors() {
        let err: PostureError = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err()
            .into();
        assert!(matches!(err, PostureError::Inference { .. }));
    }
}
