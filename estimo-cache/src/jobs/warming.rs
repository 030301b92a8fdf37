//! Cache Warming Background Task
//!
//! Keeps hot keys populated so the first request after startup (or after an
//! invalidation) is a hit. Handlers and startup code talk to the task through
//! a [`WarmingHandle`]:
//!
//! - `enqueue`: warm a key once, as soon as the task picks it up
//! - `register`: warm a key now and again on every warming interval
//!
//! Warming goes through the normal read-through path, so an entry that is
//! still cached is left alone and a producer error is logged, never cached.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use estimo_core::{CacheSettings, TenantId};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

use super::job_period;
use crate::cache::TenantCache;
use crate::options::CacheOptions;

/// Default number of commands the queue holds before `enqueue` fails.
pub const DEFAULT_WARM_QUEUE_CAPACITY: usize = 256;

/// Type-erased producer for a warmed key.
pub type WarmProducer =
    Arc<dyn Fn() -> BoxFuture<'static, Result<serde_json::Value, String>> + Send + Sync>;

/// A key to warm and how to compute it.
#[derive(Clone)]
pub struct WarmSpec {
    pub tenant_id: TenantId,
    pub key: String,
    pub options: CacheOptions,
    producer: WarmProducer,
}

impl WarmSpec {
    pub fn new<F, Fut>(
        tenant_id: TenantId,
        key: impl Into<String>,
        options: CacheOptions,
        producer: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        Self {
            tenant_id,
            key: key.into(),
            options,
            producer: Arc::new(move || producer().boxed()),
        }
    }
}

impl fmt::Debug for WarmSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmSpec")
            .field("tenant_id", &self.tenant_id)
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Message accepted by the warming task.
#[derive(Debug)]
pub enum WarmCommand {
    /// Warm once.
    Warm(WarmSpec),
    /// Warm now and on every interval.
    Register(WarmSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WarmingError {
    #[error("Warming queue is full")]
    QueueFull,

    #[error("Warming task is not running")]
    QueueClosed,
}

/// Configuration for the warming task.
#[derive(Debug, Clone)]
pub struct WarmingConfig {
    /// Time between re-warms of registered keys (default: 600 seconds)
    pub interval: Duration,
    pub queue_capacity: usize,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

impl WarmingConfig {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            interval: settings.warm_interval,
            queue_capacity: DEFAULT_WARM_QUEUE_CAPACITY,
        }
    }
}

/// Sending side of the warming queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WarmingHandle {
    tx: mpsc::Sender<WarmCommand>,
}

impl WarmingHandle {
    /// Ask for `spec` to be warmed once. Never waits.
    pub fn enqueue(&self, spec: WarmSpec) -> Result<(), WarmingError> {
        self.send(WarmCommand::Warm(spec))
    }

    /// Add `spec` to the hot keys that are re-warmed every interval.
    pub fn register(&self, spec: WarmSpec) -> Result<(), WarmingError> {
        self.send(WarmCommand::Register(spec))
    }

    fn send(&self, command: WarmCommand) -> Result<(), WarmingError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WarmingError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WarmingError::QueueClosed,
        })
    }
}

/// Create the queue feeding [`cache_warming_task`].
pub fn warming_channel(config: &WarmingConfig) -> (WarmingHandle, mpsc::Receiver<WarmCommand>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    (WarmingHandle { tx }, rx)
}

/// Counters for warming activity.
#[derive(Debug, Default)]
pub struct WarmingMetrics {
    /// Keys a warm wrote to the store.
    pub warmed: AtomicU64,
    /// Warms that found the key still cached.
    pub already_cached: AtomicU64,
    /// Producer errors plus values the store would not take.
    pub failed: AtomicU64,
    /// Warms skipped because the cache was disabled.
    pub skipped: AtomicU64,
    pub cycles: AtomicU64,
}

impl WarmingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WarmingSnapshot {
        WarmingSnapshot {
            warmed: self.warmed.load(Ordering::Relaxed),
            already_cached: self.already_cached.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmingSnapshot {
    pub warmed: u64,
    pub already_cached: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cycles: u64,
}

/// Background task that warms `hot_keys` at startup and every interval, and
/// serves queued commands in between.
///
/// Runs until the shutdown signal fires. Once every [`WarmingHandle`] is
/// dropped it keeps re-warming registered keys.
///
/// ```ignore
/// let config = WarmingConfig::from_settings(&settings);
/// let (handle, commands_rx) = warming_channel(&config);
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// tokio::spawn(cache_warming_task(Arc::clone(&cache), hot_keys, config, commands_rx, shutdown_rx));
///
/// handle.enqueue(WarmSpec::new(tenant, "materials:list", options, producer))?;
/// ```
pub async fn cache_warming_task(
    cache: Arc<TenantCache>,
    mut hot_keys: Vec<WarmSpec>,
    config: WarmingConfig,
    mut commands_rx: mpsc::Receiver<WarmCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<WarmingMetrics> {
    let metrics = Arc::new(WarmingMetrics::new());

    // The first tick fires immediately, which is the startup warm.
    let period = job_period(config.interval, "cache_warming");
    let mut warm_interval = interval(period);
    warm_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut commands_open = true;

    tracing::info!(
        interval_secs = period.as_secs(),
        hot_keys = hot_keys.len(),
        "Cache warming task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache warming task shutting down");
                    break;
                }
            }

            _ = warm_interval.tick() => {
                metrics.cycles.fetch_add(1, Ordering::Relaxed);
                for spec in &hot_keys {
                    warm_one(&cache, spec, &metrics).await;
                }
            }

            command = commands_rx.recv(), if commands_open => {
                match command {
                    Some(WarmCommand::Warm(spec)) => warm_one(&cache, &spec, &metrics).await,
                    Some(WarmCommand::Register(spec)) => {
                        warm_one(&cache, &spec, &metrics).await;
                        hot_keys.push(spec);
                    }
                    None => {
                        tracing::debug!("Warming queue closed, keeping registered keys");
                        commands_open = false;
                    }
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        warmed = snapshot.warmed,
        already_cached = snapshot.already_cached,
        failed = snapshot.failed,
        skipped = snapshot.skipped,
        cycles = snapshot.cycles,
        "Cache warming task completed"
    );

    metrics
}

async fn warm_one(cache: &TenantCache, spec: &WarmSpec, metrics: &WarmingMetrics) {
    if !cache.is_enabled() {
        metrics.skipped.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let producer = Arc::clone(&spec.producer);
    let result = cache
        .read_through(&spec.tenant_id, &spec.key, spec.options.clone(), move || {
            producer()
        })
        .await;

    match result {
        Ok((read, _)) if read.was_cache_hit() => {
            metrics.already_cached.fetch_add(1, Ordering::Relaxed);
        }
        Ok((_, true)) => {
            metrics.warmed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(tenant = %spec.tenant_id, key = %spec.key, "Cache key warmed");
        }
        Ok((_, false)) => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                tenant = %spec.tenant_id,
                key = %spec.key,
                "Warmed value was not stored"
            );
        }
        Err(e) => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                tenant = %spec.tenant_id,
                key = %spec.key,
                error = %e,
                "Failed to warm cache key"
            );
        }
    }
}
