//! switchyard-user-service: user creation responder
//!
//! Answers user-creation requests with `{"created_user_id": ...}` or a
//! structured conflict error.
//!
//! ## Architecture
//! ```text
//! [switchyard-register] --(user_creation_queue)--> [switchyard-user-service]
//!          ^                                                 |
//!          +-------------(exclusive reply queue)-------------+
//! ```
//!
//! ## Configuration
//! - SWITCHYARD_CONFIG: Path to YAML configuration (optional)
//! - SWITCHYARD__BROKER__URL: AMQP URL overriding host/port/user/password
//! - SWITCHYARD__QUEUES__USER_CREATION: Request queue name

use std::sync::Arc;

use tracing::info;

use switchyard::broker::ChannelHub;
use switchyard::config::Config;
use switchyard::rpc::serve;
use switchyard::services::users::{CreateUserOperation, InMemoryUserStore};
use switchyard::utils::bootstrap::{init_tracing, with_broker_retry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    info!(broker_type = ?config.broker.broker_type, "Using broker backend");

    let broker = config.broker.connect(&ChannelHub::new())?;
    let operation = Arc::new(CreateUserOperation::new(Arc::new(InMemoryUserStore::new())));

    let queue = config.queues.user_creation.clone();
    with_broker_retry("user creation queue", || {
        serve(Arc::clone(&broker), &queue, Arc::clone(&operation))
    })
    .await?;

    info!(queue = %queue, "switchyard-user-service started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    broker.shutdown().await?;
    Ok(())
}
