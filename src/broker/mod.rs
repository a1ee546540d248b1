//! Message broker connection for request/reply messaging.
//!
//! This module contains:
//! - `Broker` trait: one connection/channel pair with publish, consume and
//!   exclusive queue declaration
//! - `DeliveryHandler` trait: for processing consumed messages
//! - Wire types (`Envelope`, `Delivery`) and settlement rules
//! - Implementations: AMQP (RabbitMQ), in-process channel hub, Mock

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod channel;
pub mod mock;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use channel::{ChannelBroker, ChannelHub};
pub use mock::MockBroker;

// ============================================================================
// Errors
// ============================================================================

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur during broker operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Connect-time failure (refused connection, authentication). Never retried here.
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Broker connection closed")]
    Closed,

    #[error("Queue declaration failed: {0}")]
    Declare(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),
}

/// Errors a delivery handler reports back to the consume loop.
///
/// The variant decides how the message is settled, see [`Disposition`].
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The message violates the wire contract. Rejected without requeue.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Processing failed unexpectedly. Left unacknowledged for redelivery.
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// How a message whose handler returned this error is settled.
    pub fn disposition(&self) -> Disposition {
        match self {
            HandlerError::Malformed(_) => Disposition::Reject,
            HandlerError::Failed(_) => Disposition::Abandon,
        }
    }
}

/// Settlement of a consumed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing finished; remove the message from the queue.
    Ack,
    /// Drop the message without requeueing it.
    Reject,
    /// Leave the message unacknowledged. The broker redelivers it once the
    /// consuming channel goes away.
    Abandon,
}

impl Disposition {
    /// Map a handler outcome to its settlement.
    pub fn of(outcome: &std::result::Result<(), HandlerError>) -> Self {
        match outcome {
            Ok(()) => Disposition::Ack,
            Err(e) => e.disposition(),
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// The unit transmitted over the broker: addressing metadata plus an opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Token echoed from a request into its reply.
    pub correlation_id: Option<String>,
    /// Queue the reply must be sent to. Present on requests only.
    pub reply_to: Option<String>,
    /// Payload, opaque to the broker and correlation layers.
    pub body: Bytes,
}

impl Envelope {
    /// A request expecting a reply on `reply_to`.
    pub fn request(
        correlation_id: impl Into<String>,
        reply_to: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            reply_to: Some(reply_to.into()),
            body: body.into(),
        }
    }

    /// A reply tagged with the requester's correlation id.
    pub fn reply(correlation_id: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            correlation_id,
            reply_to: None,
            body: body.into(),
        }
    }

    /// A fire-and-forget message: no reply address, no correlation.
    pub fn event(body: impl Into<Bytes>) -> Self {
        Self {
            correlation_id: None,
            reply_to: None,
            body: body.into(),
        }
    }

    /// Replies carry a correlation id but no reply address.
    ///
    /// Reply targets are exclusive queues owned by another connection, so
    /// brokers must not declare them on publish.
    pub fn is_reply(&self) -> bool {
        self.correlation_id.is_some() && self.reply_to.is_none()
    }
}

/// A consumed message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Envelope,
    /// Set when the broker has delivered this message before.
    pub redelivered: bool,
}

impl Delivery {
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            redelivered: false,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Kind of queue a consumer subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Well-known queue surviving broker restarts. Declared idempotently.
    Durable,
    /// Queue previously returned by [`Broker::declare_exclusive_queue`].
    Exclusive,
}

/// Lifecycle of a broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unconnected => write!(f, "unconnected"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Handler for processing consumed messages.
///
/// The returned outcome decides settlement; handlers never ack themselves.
pub trait DeliveryHandler: Send + Sync {
    fn handle(&self, delivery: Delivery)
        -> BoxFuture<'static, std::result::Result<(), HandlerError>>;

    /// The consumer stopped without `shutdown`, e.g. its channel closed.
    /// No further deliveries will arrive.
    fn cancelled(&self) {}
}

/// One connection and one logical channel to a message broker.
///
/// Both are established lazily by the first operation that needs them.
/// Connect-time failures surface as [`BrokerError::Unreachable`] and are
/// never retried internally.
///
/// Implementations:
/// - `AmqpBroker`: RabbitMQ via lapin
/// - `ChannelBroker`: in-process hub for standalone runs and tests
/// - `MockBroker`: recording mock for unit tests
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish an envelope to `queue` through the default exchange.
    ///
    /// Non-reply targets are declared durable on first use.
    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<()>;

    /// Start delivering messages from `queue` to `handler`.
    ///
    /// Returns once the subscription is active; delivery runs in the background
    /// until the connection shuts down. A consumer lost any other way calls
    /// [`DeliveryHandler::cancelled`].
    async fn consume(
        &self,
        queue: &str,
        kind: QueueKind,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<()>;

    /// Declare a server-named queue scoped to this connection and deleted
    /// when it closes.
    async fn declare_exclusive_queue(&self) -> Result<String>;

    /// Close channel then connection. Idempotent.
    async fn shutdown(&self) -> Result<()>;

    /// Current connection state.
    async fn state(&self) -> ConnectionState;
}
