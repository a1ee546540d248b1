//! Responder side: answer requests consumed from a durable queue.
//!
//! Per delivery: decode → execute → encode reply → publish to `reply_to` →
//! settle. Settlement happens in the broker's consume loop after this
//! handler returns, so the inbound message is acknowledged only once its
//! reply has been published (or skipped, for fire-and-forget messages).

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::{RemoteError, Reply};
use crate::broker::{Broker, Delivery, DeliveryHandler, Envelope, HandlerError, QueueKind};

/// Failure of a business operation.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// Recognised business failure, returned to the caller as data.
    #[error(transparent)]
    Rejected(#[from] RemoteError),

    /// Bug or infrastructure fault. The request is left unacknowledged.
    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

/// A business operation invoked for each decoded request.
///
/// `Response` must not serialize to JSON `null`, or success and failure
/// replies become indistinguishable.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    type Request: DeserializeOwned + Send;
    type Response: Serialize + Send;

    async fn execute(&self, request: Self::Request) -> Result<Self::Response, OperationError>;
}

/// Delivery handler running an [`Operation`] and publishing its reply.
pub struct ResponderCallback<O> {
    operation: Arc<O>,
    broker: Arc<dyn Broker>,
}

impl<O: Operation> ResponderCallback<O> {
    /// `broker` is the connection replies are published on.
    pub fn new(operation: Arc<O>, broker: Arc<dyn Broker>) -> Self {
        Self { operation, broker }
    }

    async fn process(
        operation: Arc<O>,
        broker: Arc<dyn Broker>,
        delivery: Delivery,
    ) -> Result<(), HandlerError> {
        let Envelope {
            correlation_id,
            reply_to,
            body,
        } = delivery.envelope;

        debug!(
            correlation_id = ?correlation_id,
            redelivered = delivery.redelivered,
            "Received request"
        );

        let request: O::Request = serde_json::from_slice(&body).map_err(|e| {
            error!(correlation_id = ?correlation_id, error = %e, "Undecodable request");
            HandlerError::Malformed(format!("Undecodable request: {}", e))
        })?;

        let reply = match operation.execute(request).await {
            Ok(result) => Reply::ok(result),
            Err(OperationError::Rejected(remote)) => {
                info!(
                    correlation_id = ?correlation_id,
                    kind = ?remote.kind,
                    message = %remote.message,
                    "Request rejected"
                );
                Reply::err(remote)
            }
            Err(OperationError::Unexpected(message)) => {
                return Err(HandlerError::Failed(message));
            }
        };

        let Some(reply_to) = reply_to else {
            debug!("No reply address, reply skipped");
            return Ok(());
        };

        if correlation_id.is_none() {
            warn!(reply_to = %reply_to, "Request without correlation id");
        }

        let body = serde_json::to_vec(&reply)
            .map_err(|e| HandlerError::Failed(format!("Failed to encode reply: {}", e)))?;

        broker
            .publish(&reply_to, Envelope::reply(correlation_id, body))
            .await
            .map_err(|e| HandlerError::Failed(format!("Failed to publish reply: {}", e)))?;

        debug!(reply_to = %reply_to, "Sent reply");
        Ok(())
    }
}

impl<O: Operation> DeliveryHandler for ResponderCallback<O> {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(Self::process(
            Arc::clone(&self.operation),
            Arc::clone(&self.broker),
            delivery,
        ))
    }
}

/// Answer requests arriving on the durable `queue` with `operation`.
pub async fn serve<O: Operation>(
    broker: Arc<dyn Broker>,
    queue: &str,
    operation: Arc<O>,
) -> crate::broker::Result<()> {
    let callback = ResponderCallback::new(operation, Arc::clone(&broker));
    broker
        .consume(queue, QueueKind::Durable, Arc::new(callback))
        .await?;
    info!(queue = %queue, "Responder serving");
    Ok(())
}
