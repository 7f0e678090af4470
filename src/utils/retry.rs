//! Backoff builders for upstream calls and event delivery.
//!
//! Uses `backon`. Upstream acquisition retries use a fixed delay so that a
//! domain's retry schedule is predictable; event delivery uses exponential
//! backoff with jitter.

use std::time::Duration;

use backon::{ConstantBuilder, ExponentialBuilder};

/// Fixed-delay backoff allowing `retry_limit` retries after the first attempt.
pub fn fixed_backoff(retry_limit: u32, delay: Duration) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(retry_limit as usize)
}

/// Backoff for event sink deliveries.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 5
/// - Jitter enabled
pub fn sink_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(5)
        .with_jitter()
}
