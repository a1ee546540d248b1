//! In-process broker for standalone mode and tests.
//!
//! A `ChannelHub` plays the broker server: it owns named queues backed by
//! tokio mpsc channels. Each `ChannelBroker` is one connection to the hub.
//! Semantics follow AMQP's default exchange closely enough for the RPC
//! layer to behave the same against either backend:
//! - durable queues buffer messages until a consumer arrives
//! - several consumers on one queue compete, each message goes to one of them
//! - exclusive queues belong to the declaring connection and disappear with it
//! - publishing to a missing queue silently drops the message
//! - messages left unacknowledged are requeued, flagged redelivered, when
//!   the consuming connection shuts down, including those still inside a
//!   handler at that moment

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{
    Broker, BrokerError, ConnectionState, Delivery, DeliveryHandler, Disposition, Envelope,
    QueueKind, Result,
};

/// Prefix for server-generated queue names, mirroring RabbitMQ.
pub const GENERATED_QUEUE_PREFIX: &str = "amq.gen-";

struct QueueState {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
    /// Owning connection for exclusive queues.
    owner: Option<u64>,
}

impl QueueState {
    fn new(owner: Option<u64>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            owner,
        }
    }
}

/// Deliveries handed to a handler and not yet acked or rejected.
///
/// Settling never awaits, so an aborted consumer leaves exactly the
/// messages it had not settled.
#[derive(Default)]
struct Unsettled {
    next_tag: AtomicU64,
    entries: StdMutex<BTreeMap<u64, (String, Envelope)>>,
}

impl Unsettled {
    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, (String, Envelope)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, queue: &str, envelope: Envelope) -> u64 {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(tag, (queue.to_string(), envelope));
        tag
    }

    fn settle(&self, tag: u64) {
        self.entries().remove(&tag);
    }

    /// Everything still unsettled, in delivery order.
    fn drain(&self) -> Vec<(String, Envelope)> {
        std::mem::take(&mut *self.entries()).into_values().collect()
    }
}

#[derive(Default)]
struct HubInner {
    queues: RwLock<HashMap<String, QueueState>>,
    next_connection: AtomicU64,
}

/// In-process message broker shared by any number of connections.
#[derive(Clone, Default)]
pub struct ChannelHub {
    inner: Arc<HubInner>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new (lazily connecting) connection to this hub.
    pub fn connect(&self) -> ChannelBroker {
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        ChannelBroker {
            hub: self.clone(),
            id,
            state: RwLock::new(ConnectionState::Unconnected),
            exclusive: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            unsettled: Arc::new(Unsettled::default()),
        }
    }

    /// Whether a queue with this name currently exists.
    pub async fn has_queue(&self, name: &str) -> bool {
        self.inner.queues.read().await.contains_key(name)
    }

    async fn declare_durable(&self, name: &str) {
        let mut queues = self.inner.queues.write().await;
        if !queues.contains_key(name) {
            queues.insert(name.to_string(), QueueState::new(None));
            debug!(queue = %name, "Declared durable queue");
        }
    }

    async fn declare_exclusive(&self, owner: u64) -> String {
        let name = format!(
            "{}{}",
            GENERATED_QUEUE_PREFIX,
            uuid::Uuid::new_v4().simple()
        );
        self.inner
            .queues
            .write()
            .await
            .insert(name.clone(), QueueState::new(Some(owner)));
        name
    }

    async fn delete(&self, name: &str) {
        if self.inner.queues.write().await.remove(name).is_some() {
            debug!(queue = %name, "Deleted queue");
        }
    }

    /// Deliver to `queue`, dropping the message if the queue does not exist.
    async fn route(&self, queue: &str, delivery: Delivery) {
        let queues = self.inner.queues.read().await;
        match queues.get(queue) {
            Some(state) => {
                if state.sender.send(delivery).is_err() {
                    debug!(queue = %queue, "Queue receiver gone, message dropped");
                }
            }
            None => debug!(queue = %queue, "Unroutable message dropped"),
        }
    }

    async fn receiver(
        &self,
        queue: &str,
        connection: u64,
    ) -> Option<Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>> {
        let queues = self.inner.queues.read().await;
        queues
            .get(queue)
            .filter(|state| state.owner.map_or(true, |owner| owner == connection))
            .map(|state| state.receiver.clone())
    }
}

/// One connection to a [`ChannelHub`].
pub struct ChannelBroker {
    hub: ChannelHub,
    id: u64,
    state: RwLock<ConnectionState>,
    exclusive: Mutex<Vec<String>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    /// In-flight and abandoned messages, requeued on shutdown.
    unsettled: Arc<Unsettled>,
}

impl ChannelBroker {
    async fn ensure_connected(&self) -> Result<()> {
        let mut state = self.state.write().await;
        match *state {
            ConnectionState::Closed => Err(BrokerError::Closed),
            ConnectionState::Connected => Ok(()),
            ConnectionState::Unconnected => {
                *state = ConnectionState::Connected;
                debug!(connection = self.id, "Connected to channel hub");
                Ok(())
            }
        }
    }

    async fn consume_loop(
        queue: String,
        receiver: Arc<Mutex<mpsc::UnboundedReceiver<Delivery>>>,
        handler: Arc<dyn DeliveryHandler>,
        unsettled: Arc<Unsettled>,
    ) {
        loop {
            // Released before handling so competing consumers can take the next message.
            let delivery = receiver.lock().await.recv().await;
            let Some(delivery) = delivery else {
                break;
            };

            let tag = unsettled.track(&queue, delivery.envelope.clone());
            let outcome = handler.handle(delivery).await;

            if Disposition::of(&outcome) != Disposition::Abandon {
                unsettled.settle(tag);
            }
            if let Err(e) = outcome {
                error!(queue = %queue, error = %e, "Handler failed");
            }
        }

        debug!(queue = %queue, "Channel consumer stopped");
        handler.cancelled();
    }
}

#[async_trait]
impl Broker for ChannelBroker {
    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<()> {
        self.ensure_connected().await?;

        if !envelope.is_reply() {
            self.hub.declare_durable(queue).await;
        }

        debug!(queue = %queue, reply = envelope.is_reply(), "Published message");
        self.hub.route(queue, Delivery::new(envelope)).await;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        kind: QueueKind,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<()> {
        self.ensure_connected().await?;

        if kind == QueueKind::Durable {
            self.hub.declare_durable(queue).await;
        }

        let receiver = self.hub.receiver(queue, self.id).await.ok_or_else(|| {
            BrokerError::Consume(format!("No queue '{}' available to this connection", queue))
        })?;

        let handle = tokio::spawn(Self::consume_loop(
            queue.to_string(),
            receiver,
            handler,
            Arc::clone(&self.unsettled),
        ));
        self.consumers.lock().await.push(handle);

        info!(queue = %queue, connection = self.id, "Channel consumer started");
        Ok(())
    }

    async fn declare_exclusive_queue(&self) -> Result<String> {
        self.ensure_connected().await?;

        let name = self.hub.declare_exclusive(self.id).await;
        self.exclusive.lock().await.push(name.clone());

        debug!(queue = %name, connection = self.id, "Declared exclusive queue");
        Ok(name)
    }

    async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == ConnectionState::Closed {
                return Ok(());
            }
            *state = ConnectionState::Closed;
        }

        let consumers: Vec<_> = self.consumers.lock().await.drain(..).collect();
        for handle in &consumers {
            handle.abort();
        }
        // Stopped consumers take no further deliveries before the requeue below.
        for handle in consumers {
            let _ = handle.await;
        }

        for queue in self.exclusive.lock().await.drain(..) {
            self.hub.delete(&queue).await;
        }

        for (queue, envelope) in self.unsettled.drain() {
            self.hub
                .route(
                    &queue,
                    Delivery {
                        envelope,
                        redelivered: true,
                    },
                )
                .await;
        }

        info!(connection = self.id, "Channel broker has shut down");
        Ok(())
    }

    async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }
}

#[cfg(test)]
mod tests;
