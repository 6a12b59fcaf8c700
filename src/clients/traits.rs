use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorKind {
    MissingCredential,
    InvalidInput,
    TransportOrHttpError,
    EmptyOrBlockedResponse,
}

/// Failure of one analysis call. `detail` is user-facing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{detail}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub detail: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn missing_credential() -> Self {
        Self::new(
            ServiceErrorKind::MissingCredential,
            "GEMINI_API_KEY missing: no inference credential configured",
        )
    }

    pub fn invalid_input(detail: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::InvalidInput, detail)
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::TransportOrHttpError, detail)
    }

    pub fn empty_or_blocked(detail: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::EmptyOrBlockedResponse, detail)
    }
}

/// Remote vision-language classification of one frame.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Cheap pre-flight check; lets the orchestrator skip the call entirely
    /// when it could never succeed.
    fn ready(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Returns the model's raw output text, unparsed.
    async fn analyze(&self, frame: &Frame, prompt: &str) -> Result<String, ServiceError>;
}
