//! Bootstrap utilities for switchyard binaries.
//!
//! Shared initialization code for the service and requester binaries.

use std::future::Future;

use backon::Retryable;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::retry::{connection_backoff, is_retryable_broker_error};
use crate::broker::BrokerError;
use crate::config::LOG_ENV_VAR;

/// Initialize tracing with SWITCHYARD_LOG environment variable.
///
/// Defaults to "info" level if SWITCHYARD_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run a broker startup step with exponential backoff.
///
/// # Arguments
/// * `what` - Human-readable name for logging (e.g., "user creation queue")
/// * `step` - Async function that attempts the step
pub async fn with_broker_retry<T, F, Fut>(what: &str, step: F) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let result = step
        .retry(connection_backoff())
        .when(is_retryable_broker_error)
        .notify(|e, delay| {
            warn!(what = %what, error = %e, ?delay, "Broker not ready, retrying");
        })
        .await;

    match &result {
        Ok(_) => info!(what = %what, "Broker step succeeded"),
        Err(e) => warn!(what = %what, error = %e, "Broker step failed, giving up"),
    }
    result
}
