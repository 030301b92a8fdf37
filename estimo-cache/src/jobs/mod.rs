//! Background jobs for the cache.
//!
//! - `sweep`: drops expired entries and prunes the dependency index
//! - `warming`: keeps hot keys populated
//!
//! # Usage
//!
//! Both jobs are spawned at server startup and share one shutdown signal:
//!
//! ```ignore
//! use estimo_cache::jobs::{cache_warming_task, expiry_sweep_task, warming_channel};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//! tokio::spawn(expiry_sweep_task(
//!     Arc::clone(&cache),
//!     SweepConfig::from_settings(&settings),
//!     shutdown_rx.clone(),
//! ));
//!
//! let warming = WarmingConfig::from_settings(&settings);
//! let (warm_handle, commands_rx) = warming_channel(&warming);
//! tokio::spawn(cache_warming_task(Arc::clone(&cache), hot_keys, warming, commands_rx, shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

use std::time::Duration;

pub mod sweep;
pub mod warming;

pub use sweep::{expiry_sweep_task, SweepConfig, SweepMetrics, SweepSnapshot};
pub use warming::{
    cache_warming_task, warming_channel, WarmCommand, WarmProducer, WarmSpec, WarmingConfig,
    WarmingError, WarmingHandle, WarmingMetrics, WarmingSnapshot, DEFAULT_WARM_QUEUE_CAPACITY,
};

/// Shortest period either job ticks at.
pub const MIN_JOB_INTERVAL: Duration = Duration::from_millis(100);

/// Clamp a configured interval to [`MIN_JOB_INTERVAL`].
pub(crate) fn job_period(requested: Duration, job: &'static str) -> Duration {
    if requested >= MIN_JOB_INTERVAL {
        return requested;
    }
    tracing::warn!(
        job,
        requested_ms = requested.as_millis() as u64,
        min_ms = MIN_JOB_INTERVAL.as_millis() as u64,
        "Job interval below minimum, clamping"
    );
    MIN_JOB_INTERVAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_period_clamps_short_intervals() {
        assert_eq!(job_period(Duration::ZERO, "sweep"), MIN_JOB_INTERVAL);
        assert_eq!(job_period(Duration::from_millis(5), "sweep"), MIN_JOB_INTERVAL);
        assert_eq!(
            job_period(Duration::from_secs(60), "sweep"),
            Duration::from_secs(60)
        );
    }
}
