//! switchyard-notes-service: deletes a user's notes on request
//!
//! Consumes `{"user_id": ...}` messages cast by the user service. No reply
//! is sent.
//!
//! ## Configuration
//! - SWITCHYARD_CONFIG: Path to YAML configuration (optional)
//! - SWITCHYARD__QUEUES__DELETE_NOTES: Queue name

use std::sync::Arc;

use tracing::info;

use switchyard::broker::ChannelHub;
use switchyard::config::Config;
use switchyard::rpc::serve;
use switchyard::services::notes::{DeleteNotesOperation, InMemoryNoteStore};
use switchyard::utils::bootstrap::{init_tracing, with_broker_retry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let broker = config.broker.connect(&ChannelHub::new())?;
    let operation = Arc::new(DeleteNotesOperation::new(Arc::new(InMemoryNoteStore::new())));

    let queue = config.queues.delete_notes.clone();
    with_broker_retry("delete notes queue", || {
        serve(Arc::clone(&broker), &queue, Arc::clone(&operation))
    })
    .await?;

    info!(queue = %queue, "switchyard-notes-service started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    broker.shutdown().await?;
    Ok(())
}
