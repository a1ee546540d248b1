//! Test utilities shared by unit tests.

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::broker::{Delivery, DeliveryHandler, HandlerError};

/// Outcome a [`RecordingHandler`] reports for every delivery.
#[derive(Debug, Clone, Copy)]
pub enum TestOutcome {
    Ok,
    Malformed,
    Failed,
    /// Never returns, as if the consumer died mid-handling.
    Hang,
}

/// Handler that forwards every delivery to a channel.
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<Delivery>,
    outcome: TestOutcome,
}

impl RecordingHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        Self::with_outcome(TestOutcome::Ok)
    }

    pub fn with_outcome(outcome: TestOutcome) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, outcome }, rx)
    }
}

impl DeliveryHandler for RecordingHandler {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        let _ = self.tx.send(delivery);
        let outcome = self.outcome;
        Box::pin(async move {
            match outcome {
                TestOutcome::Ok => Ok(()),
                TestOutcome::Malformed => Err(HandlerError::Malformed("test".to_string())),
                TestOutcome::Failed => Err(HandlerError::Failed("test".to_string())),
                TestOutcome::Hang => std::future::pending().await,
            }
        })
    }
}

/// Wait up to one second for the next delivery.
pub async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
    tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
        .await
        .expect("Timed out waiting for delivery")
        .expect("Handler channel closed")
}
