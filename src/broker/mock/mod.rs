//! Mock broker implementation for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};

use super::{
    Broker, BrokerError, ConnectionState, Delivery, DeliveryHandler, Disposition, Envelope,
    QueueKind, Result,
};

/// Mock broker for testing.
///
/// Records publishes instead of routing them. Tests inject deliveries with
/// [`MockBroker::deliver`] to drive whatever handler consumes a queue.
pub struct MockBroker {
    published: RwLock<Vec<(String, Envelope)>>,
    handlers: RwLock<HashMap<String, Arc<dyn DeliveryHandler>>>,
    state: RwLock<ConnectionState>,
    fail_on_connect: RwLock<bool>,
    exclusive_declared: AtomicUsize,
    publish_notify: Notify,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self {
            published: RwLock::new(Vec::new()),
            handlers: RwLock::new(HashMap::new()),
            state: RwLock::new(ConnectionState::Unconnected),
            fail_on_connect: RwLock::new(false),
            exclusive_declared: AtomicUsize::new(0),
            publish_notify: Notify::new(),
        }
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as if the broker were down.
    pub async fn set_fail_on_connect(&self, fail: bool) {
        *self.fail_on_connect.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<(String, Envelope)> {
        std::mem::take(&mut *self.published.write().await)
    }

    /// Wait until at least `count` messages have been published.
    pub async fn wait_for_published(&self, count: usize) {
        loop {
            let notified = self.publish_notify.notified();
            if self.published_count().await >= count {
                return;
            }
            notified.await;
        }
    }

    /// Number of exclusive queues declared so far.
    pub fn exclusive_declared(&self) -> usize {
        self.exclusive_declared.load(Ordering::SeqCst)
    }

    /// Whether a handler is consuming `queue`.
    pub async fn is_consuming(&self, queue: &str) -> bool {
        self.handlers.read().await.contains_key(queue)
    }

    /// Hand a delivery to the handler consuming `queue`.
    ///
    /// Returns the settlement the handler's outcome maps to, or `None` if no
    /// handler consumes that queue.
    pub async fn deliver(&self, queue: &str, delivery: Delivery) -> Option<Disposition> {
        let handler = self.handlers.read().await.get(queue).cloned()?;
        let outcome = handler.handle(delivery).await;
        Some(Disposition::of(&outcome))
    }

    /// End the consumer of `queue` as a broker would when its channel closes.
    ///
    /// Returns whether a consumer was running.
    pub async fn cancel_consumer(&self, queue: &str) -> bool {
        let handler = self.handlers.write().await.remove(queue);
        match handler {
            Some(handler) => {
                handler.cancelled();
                true
            }
            None => false,
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        if *self.fail_on_connect.read().await {
            return Err(BrokerError::Unreachable(
                "Mock broker connection refused".to_string(),
            ));
        }
        let mut state = self.state.write().await;
        match *state {
            ConnectionState::Closed => Err(BrokerError::Closed),
            _ => {
                *state = ConnectionState::Connected;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<()> {
        self.ensure_connected().await?;
        self.published
            .write()
            .await
            .push((queue.to_string(), envelope));
        self.publish_notify.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _kind: QueueKind,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<()> {
        self.ensure_connected().await?;
        self.handlers
            .write()
            .await
            .insert(queue.to_string(), handler);
        Ok(())
    }

    async fn declare_exclusive_queue(&self) -> Result<String> {
        self.ensure_connected().await?;
        let n = self.exclusive_declared.fetch_add(1, Ordering::SeqCst);
        Ok(format!("amq.gen-mock-{}", n))
    }

    async fn shutdown(&self) -> Result<()> {
        *self.state.write().await = ConnectionState::Closed;
        self.handlers.write().await.clear();
        Ok(())
    }

    async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }
}
