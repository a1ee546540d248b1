//! Caller-facing RPC client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ReplyCorrelator, Reply, Result, RpcError};
use crate::broker::{
    Broker, Delivery, DeliveryHandler, Envelope, HandlerError, QueueKind,
};

/// Forwards every reply on the exclusive queue to the correlator.
struct ReplyDispatcher {
    queue: String,
    correlator: ReplyCorrelator,
    live: Arc<AtomicBool>,
}

impl DeliveryHandler for ReplyDispatcher {
    fn handle(
        &self,
        delivery: Delivery,
    ) -> BoxFuture<'static, std::result::Result<(), HandlerError>> {
        let outcome = match delivery.envelope.correlation_id {
            Some(id) => {
                if self.correlator.resolve(&id, delivery.envelope.body) {
                    debug!(correlation_id = %id, "RPC reply dispatched");
                }
                Ok(())
            }
            None => Err(HandlerError::Malformed(
                "reply without correlation id".to_string(),
            )),
        };
        Box::pin(async move { outcome })
    }

    fn cancelled(&self) {
        warn!(queue = %self.queue, "RPC reply consumer cancelled by broker");
        // New calls redeclare; nothing can answer the waiting ones.
        self.live.store(false, Ordering::Release);
        self.correlator.cancel_all();
    }
}

/// The reply queue in use and whether its consumer is still running.
struct ReplyQueue {
    name: String,
    live: Arc<AtomicBool>,
}

/// Request/reply client over a [`Broker`].
///
/// The first call declares one exclusive reply queue and subscribes a single
/// consumer to it; every later call, concurrent or not, shares both.
///
/// If the broker cancels that consumer (its channel or connection closed),
/// the calls waiting on it fail at once with
/// [`RpcError::BrokerUnreachable`] and the next call declares a fresh queue.
pub struct RpcClient {
    broker: Arc<dyn Broker>,
    correlator: ReplyCorrelator,
    reply_queue: StdRwLock<Option<ReplyQueue>>,
    // Serializes declaring so concurrent first calls share one queue.
    declaring: Mutex<()>,
}

impl RpcClient {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            correlator: ReplyCorrelator::new(),
            reply_queue: StdRwLock::new(None),
            declaring: Mutex::new(()),
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Name of the reply queue while its consumer is running.
    pub fn reply_queue(&self) -> Option<String> {
        self.reply_queue
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|queue| queue.live.load(Ordering::Acquire))
            .map(|queue| queue.name.clone())
    }

    /// Calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.correlator.pending()
    }

    async fn ensure_reply_queue(&self) -> Result<String> {
        if let Some(queue) = self.reply_queue() {
            return Ok(queue);
        }

        let _declaring = self.declaring.lock().await;
        if let Some(queue) = self.reply_queue() {
            return Ok(queue);
        }

        let name = self.broker.declare_exclusive_queue().await?;
        let live = Arc::new(AtomicBool::new(true));
        let dispatcher = ReplyDispatcher {
            queue: name.clone(),
            correlator: self.correlator.clone(),
            live: Arc::clone(&live),
        };
        self.broker
            .consume(&name, QueueKind::Exclusive, Arc::new(dispatcher))
            .await?;
        info!(queue = %name, "RPC reply queue ready");

        *self
            .reply_queue
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(ReplyQueue {
            name: name.clone(),
            live,
        });
        Ok(name)
    }

    /// Publish `body` to `destination` and wait up to `timeout` for the reply.
    ///
    /// The reply body is returned untouched. Broker failures and timeouts are
    /// errors; a business failure is an ordinary reply.
    #[tracing::instrument(name = "rpc.call", skip_all, fields(destination = %destination))]
    pub async fn call(
        &self,
        destination: &str,
        body: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Bytes> {
        let reply_queue = self.ensure_reply_queue().await?;

        // Registered before publishing so a fast reply always finds its slot.
        let pending = self.correlator.register();
        let envelope = Envelope::request(pending.correlation_id(), reply_queue, body);

        self.broker.publish(destination, envelope).await?;

        debug!(
            correlation_id = %pending.correlation_id(),
            "RPC client is waiting for response"
        );
        pending.wait(timeout).await
    }

    /// [`call`](Self::call) with a JSON request and a decoded [`Reply`].
    pub async fn call_json<Req, Resp>(
        &self,
        destination: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Reply<Resp>>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(RpcError::Encode)?;
        let reply = self.call(destination, body, timeout).await?;
        serde_json::from_slice(&reply).map_err(RpcError::Decode)
    }

    /// Fire-and-forget publish: no reply address, nothing awaited.
    pub async fn cast(&self, destination: &str, body: impl Into<Bytes>) -> Result<()> {
        self.broker
            .publish(destination, Envelope::event(body))
            .await?;
        debug!(destination = %destination, "Published fire-and-forget message");
        Ok(())
    }

    /// [`cast`](Self::cast) with a JSON body.
    pub async fn cast_json<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        message: &T,
    ) -> Result<()> {
        let body = serde_json::to_vec(message).map_err(RpcError::Encode)?;
        self.cast(destination, body).await
    }

    /// Fail every waiting call and shut the broker connection down.
    pub async fn shutdown(&self) -> Result<()> {
        self.correlator.cancel_all();
        self.broker.shutdown().await?;
        Ok(())
    }
}
