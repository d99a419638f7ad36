//! Response Envelope
//!
//! Standard `{ status, message, data }` wrapper used by every backend route.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Envelope status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnvelopeStatus {
    Success,
    Fail,
}

/// Standard API response envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: EnvelopeStatus,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Successful envelope.
    pub fn success(data: T) -> Self {
        Self {
            status: EnvelopeStatus::Success,
            message: String::new(),
            data: Some(data),
        }
    }

    /// FAIL envelope.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: EnvelopeStatus::Fail,
            message: message.into(),
            data: None,
        }
    }

    /// Unwrap the payload. A `FAIL` status is a business failure even on HTTP 200.
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        match self.status {
            EnvelopeStatus::Success => Ok(self.data),
            EnvelopeStatus::Fail => Err(ApiError::BusinessFailure {
                message: if self.message.is_empty() {
                    "Request failed".to_string()
                } else {
                    self.message
                },
            }),
        }
    }
}
