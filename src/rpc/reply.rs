//! Reply body contract: `{"result": <value> | null, "error": <error> | null}`.
//!
//! Exactly one of the two fields is non-null. Business failures cross the
//! process boundary as a [`RemoteError`] value instead of a transport fault.

use serde::{Deserialize, Serialize};

use super::{Result, RpcError};

/// Category of a business failure reported by a responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The resource already exists (e.g. a duplicate username).
    Conflict,
    NotFound,
    InvalidRequest,
    Unavailable,
    Internal,
}

impl ErrorKind {
    /// HTTP status conventionally associated with this kind.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Conflict => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidRequest => 422,
            ErrorKind::Unavailable => 503,
            ErrorKind::Internal => 500,
        }
    }
}

/// Structured error descriptor carried inside a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    /// Human-readable explanation.
    pub message: String,
    /// Status the caller should surface, when it differs from the kind's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_hint: Option<u16>,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_hint: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn with_status_hint(mut self, status: u16) -> Self {
        self.status_hint = Some(status);
        self
    }

    /// Status hint if present, otherwise the kind's default.
    pub fn http_status(&self) -> u16 {
        self.status_hint.unwrap_or_else(|| self.kind.http_status())
    }
}

/// Decoded reply body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    pub result: Option<T>,
    pub error: Option<RemoteError>,
}

impl<T> Reply<T> {
    pub fn ok(result: T) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: RemoteError) -> Self {
        Self {
            result: None,
            error: Some(error),
        }
    }

    /// Split into success or business failure.
    ///
    /// A body with both or neither field set breaks the contract and yields
    /// `MalformedReply`.
    pub fn into_result(self) -> Result<std::result::Result<T, RemoteError>> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(Ok(result)),
            (None, Some(error)) => Ok(Err(error)),
            (Some(_), Some(_)) => Err(RpcError::MalformedReply(
                "both result and error are set".to_string(),
            )),
            (None, None) => Err(RpcError::MalformedReply(
                "neither result nor error is set".to_string(),
            )),
        }
    }
}
