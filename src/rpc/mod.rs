//! Request/reply RPC over a one-way message broker.
//!
//! Requester side:
//! ```text
//! RpcClient::call ──register──▶ ReplyCorrelator
//!        │                            ▲
//!        └─publish(reply_to, id)──▶ [request queue] ──▶ ResponderCallback
//!                                                            │
//!   reply consumer ◀── [exclusive reply queue] ◀──publish(id)┘
//! ```
//!
//! One exclusive reply queue and one consumer per client serve every
//! outstanding call; replies are told apart by correlation id alone.

use std::time::Duration;

use crate::broker::BrokerError;

pub mod client;
pub mod correlator;
pub mod reply;
pub mod responder;

pub use client::RpcClient;
pub use correlator::{PendingCall, ReplyCorrelator};
pub use reply::{ErrorKind, RemoteError, Reply};
pub use responder::{serve, Operation, OperationError, ResponderCallback};

/// Reply deadline used when the caller has no opinion.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Result type for RPC calls.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Transport-level failures of an RPC call.
///
/// Business failures are not errors here: they travel as data inside
/// [`Reply::error`].
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Message broker unavailable: {0}")]
    BrokerUnreachable(#[from] BrokerError),

    #[error("No reply for {correlation_id} within {timeout:?}")]
    Timeout {
        correlation_id: String,
        timeout: Duration,
    },

    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode reply: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Malformed reply: {0}")]
    MalformedReply(String),
}

impl RpcError {
    /// Whether the caller may reasonably try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::BrokerUnreachable(_) | RpcError::Timeout { .. })
    }
}
