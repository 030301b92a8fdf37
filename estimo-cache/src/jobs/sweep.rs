//! Expiry Sweep Background Task
//!
//! Periodically asks the store to drop expired entries and prunes index links
//! to keys that are gone. Without it, tags of entries that simply expired
//! would keep pointing at dead keys until the tag is next invalidated.
//!
//! # Configuration
//!
//! ```rust
//! use estimo_cache::jobs::SweepConfig;
//! use std::time::Duration;
//!
//! let config = SweepConfig {
//!     interval: Duration::from_secs(60),
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use estimo_core::CacheSettings;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::job_period;
use crate::cache::TenantCache;

/// Configuration for the expiry sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps (default: 60 seconds)
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

impl SweepConfig {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            interval: settings.sweep_interval,
        }
    }
}

/// Counters for sweep activity.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    pub cycles: AtomicU64,
    pub keys_purged: AtomicU64,
    pub keys_pruned: AtomicU64,
    pub errors: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            keys_purged: self.keys_purged.load(Ordering::Relaxed),
            keys_pruned: self.keys_pruned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSnapshot {
    pub cycles: u64,
    pub keys_purged: u64,
    pub keys_pruned: u64,
    pub errors: u64,
}

/// Background task that sweeps the cache until shutdown.
///
/// The first sweep runs one interval after start. Intervals shorter than
/// [`MIN_JOB_INTERVAL`](super::MIN_JOB_INTERVAL) are clamped.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(expiry_sweep_task(Arc::clone(&cache), SweepConfig::default(), shutdown_rx));
///
/// // On shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn expiry_sweep_task(
    cache: Arc<TenantCache>,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let metrics = Arc::new(SweepMetrics::new());

    let period = job_period(config.interval, "expiry_sweep");
    let mut sweep_interval = interval_at(Instant::now() + period, period);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = period.as_secs(),
        backend = cache.backend_name(),
        "Cache expiry sweep started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache expiry sweep shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                run_sweep(&cache, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        keys_purged = snapshot.keys_purged,
        keys_pruned = snapshot.keys_pruned,
        errors = snapshot.errors,
        "Cache expiry sweep completed"
    );

    metrics
}

async fn run_sweep(cache: &TenantCache, metrics: &SweepMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    let outcome = cache.sweep_once().await;
    metrics
        .keys_purged
        .fetch_add(outcome.purged, Ordering::Relaxed);
    metrics
        .keys_pruned
        .fetch_add(outcome.pruned, Ordering::Relaxed);
    metrics.errors.fetch_add(outcome.errors, Ordering::Relaxed);

    if outcome.errors > 0 {
        tracing::error!(errors = outcome.errors, "Cache sweep cycle had errors");
    } else if outcome.purged > 0 || outcome.pruned > 0 {
        tracing::info!(
            purged = outcome.purged,
            pruned = outcome.pruned,
            "Cache sweep cycle completed"
        );
    } else {
        tracing::trace!("Cache sweep cycle completed with nothing to do");
    }
}
