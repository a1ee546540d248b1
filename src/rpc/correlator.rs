//! Correlation of asynchronous replies with the calls waiting for them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{Result, RpcError};
use crate::broker::BrokerError;

struct Slot {
    /// Distinguishes registrations in case an id is ever minted twice.
    generation: u64,
    sender: oneshot::Sender<Bytes>,
}

#[derive(Default)]
struct Slots {
    map: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
}

impl Slots {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // Critical sections never panic; a poisoned map is still consistent.
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of outstanding calls keyed by correlation id.
///
/// Cheap to clone; clones share the registry. Safe to use from any number
/// of tasks at once.
#[derive(Clone, Default)]
pub struct ReplyCorrelator {
    slots: Arc<Slots>,
}

impl ReplyCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh correlation id and an unresolved slot for it.
    ///
    /// Ids are random 128-bit UUIDs; an id still outstanding is never handed
    /// out twice.
    pub fn register(&self) -> PendingCall {
        let (sender, receiver) = oneshot::channel();
        let generation = self.slots.generation.fetch_add(1, Ordering::Relaxed);

        let mut map = self.slots.lock();
        let correlation_id = loop {
            let id = uuid::Uuid::new_v4().to_string();
            if !map.contains_key(&id) {
                break id;
            }
        };
        map.insert(correlation_id.clone(), Slot { generation, sender });

        PendingCall {
            correlation_id,
            generation,
            receiver,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Hand `body` to the call registered under `correlation_id`.
    ///
    /// Returns `false` when no such call is waiting: the reply is late,
    /// duplicated or foreign, and is dropped.
    pub fn resolve(&self, correlation_id: &str, body: Bytes) -> bool {
        let slot = self.slots.lock().remove(correlation_id);
        match slot {
            Some(slot) => {
                let delivered = slot.sender.send(body).is_ok();
                if !delivered {
                    debug!(correlation_id = %correlation_id, "Caller gone, reply dropped");
                }
                delivered
            }
            None => {
                debug!(correlation_id = %correlation_id, "No pending call, reply dropped");
                false
            }
        }
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending(&self) -> usize {
        self.slots.lock().len()
    }

    /// Discard every outstanding slot. Waiting calls fail with a closed broker.
    pub fn cancel_all(&self) {
        let discarded = {
            let mut map = self.slots.lock();
            std::mem::take(&mut *map)
        };
        if !discarded.is_empty() {
            debug!(count = discarded.len(), "Cancelled pending calls");
        }
    }
}

/// An outstanding call's side of a correlation slot.
///
/// Dropping it, whether after a timeout, a failed publish or because the
/// awaiting task was cancelled, removes the registration so a later reply
/// can never land in it.
pub struct PendingCall {
    correlation_id: String,
    generation: u64,
    receiver: oneshot::Receiver<Bytes>,
    slots: Arc<Slots>,
}

impl PendingCall {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Suspend until the reply arrives or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Result<Bytes> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(RpcError::BrokerUnreachable(BrokerError::Closed)),
            Err(_) => {
                warn!(
                    correlation_id = %self.correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "RPC reply timed out"
                );
                Err(RpcError::Timeout {
                    correlation_id: self.correlation_id.clone(),
                    timeout,
                })
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        let mut map = self.slots.lock();
        if map
            .get(&self.correlation_id)
            .is_some_and(|slot| slot.generation == self.generation)
        {
            map.remove(&self.correlation_id);
        }
    }
}
