//! Retry utilities: backoff builders for caller-side policies.
//!
//! The RPC core never retries. Binaries wrap startup steps in these
//! backoffs with `backon`.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::broker::BrokerError;

/// Backoff for broker connection retries at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Whether a broker failure may clear up on its own.
///
/// A shut-down handle stays shut down.
pub fn is_retryable_broker_error(error: &BrokerError) -> bool {
    !matches!(error, BrokerError::Closed)
}
