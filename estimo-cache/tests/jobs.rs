//! Background sweep and warming tasks against a live cache.

use std::sync::Arc;
use std::time::Duration;

use estimo_cache::jobs::{
    cache_warming_task, expiry_sweep_task, warming_channel, SweepConfig, WarmSpec, WarmingConfig,
};
use estimo_cache::{CacheOptions, KeyValueStore, TenantCache};
use estimo_core::CacheSettings;
use estimo_test_utils::fixtures::{faulty_cache, memory_cache, tenant};
use estimo_test_utils::CountingProducer;
use serde_json::json;
use tokio::sync::watch;

fn warm_config(interval_secs: u64) -> WarmingConfig {
    WarmingConfig {
        interval: Duration::from_secs(interval_secs),
        queue_capacity: 16,
    }
}

#[tokio::test(start_paused = true)]
async fn test_sweep_reconciles_keys_removed_out_of_band() {
    let (cache, store) = faulty_cache();
    let cache = Arc::new(cache);
    let acme = tenant("acme");
    cache
        .set(&acme, "materials:list", &1u8, CacheOptions::new().depends_on("materials"))
        .await;
    // e.g. evicted by Redis
    store.delete("acme:materials:list").await.expect("delete");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(expiry_sweep_task(
        Arc::clone(&cache),
        SweepConfig {
            interval: Duration::from_secs(5),
        },
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(cache.index().keys_for_tag("acme:materials").is_empty());

    shutdown_tx.send(true).expect("task is listening");
    let snapshot = handle.await.expect("no panic").snapshot();
    assert_eq!(snapshot.keys_pruned, 1);
    assert_eq!(snapshot.keys_purged, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_survives_backend_errors() {
    let (cache, store) = faulty_cache();
    let cache = Arc::new(cache);
    let acme = tenant("acme");
    cache
        .set(&acme, "k", &1u8, CacheOptions::new().depends_on("t"))
        .await;
    store.fail_exists(true);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(expiry_sweep_task(
        Arc::clone(&cache),
        SweepConfig {
            interval: Duration::from_secs(1),
        },
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    shutdown_tx.send(true).expect("task is listening");
    let snapshot = handle.await.expect("no panic").snapshot();

    assert_eq!(snapshot.cycles, 2);
    assert_eq!(snapshot.errors, 2);
    // nothing pruned while the store could not answer
    assert_eq!(cache.index().key_count(), 1);
}

#[tokio::test]
async fn test_sweep_stops_when_sender_dropped() {
    let cache = Arc::new(memory_cache());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(expiry_sweep_task(cache, SweepConfig::default(), shutdown_rx));

    drop(shutdown_tx);
    let snapshot = handle.await.expect("no panic").snapshot();
    assert_eq!(snapshot.cycles, 0);
}

#[tokio::test(start_paused = true)]
async fn test_registered_hot_key_is_warm_before_first_request() {
    let cache = Arc::new(memory_cache());
    let acme = tenant("acme");
    let hot = vec![WarmSpec::new(
        acme.clone(),
        "materials:list",
        CacheOptions::new().depends_on("materials"),
        || async { Ok(json!([{"id": 1, "name": "Concrete"}])) },
    )];

    let config = warm_config(60);
    let (_handle, commands_rx) = warming_channel(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(cache_warming_task(
        Arc::clone(&cache),
        hot,
        config,
        commands_rx,
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(10)).await;

    let db = CountingProducer::new();
    let read = cache
        .get_or_set_read(&acme, "materials:list", CacheOptions::new(), || {
            db.ok(json!([]))
        })
        .await
        .expect("ok");
    assert!(read.was_cache_hit());
    assert_eq!(read.into_value(), json!([{"id": 1, "name": "Concrete"}]));
    assert_eq!(db.calls(), 0);

    shutdown_tx.send(true).expect("task is listening");
    let snapshot = task.await.expect("no panic").snapshot();
    assert_eq!(snapshot.warmed, 1);
    assert_eq!(snapshot.cycles, 1);
}

#[tokio::test(start_paused = true)]
async fn test_registered_key_is_rewarmed_after_invalidation() {
    let cache = Arc::new(memory_cache());
    let acme = tenant("acme");

    let config = warm_config(30);
    let (handle, commands_rx) = warming_channel(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(cache_warming_task(
        Arc::clone(&cache),
        Vec::new(),
        config,
        commands_rx,
        shutdown_rx,
    ));

    handle
        .register(WarmSpec::new(
            acme.clone(),
            "projects:list",
            CacheOptions::new().depends_on("projects"),
            || async { Ok(json!(["Tower A"])) },
        ))
        .expect("queue has room");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(cache.exists(&acme, "projects:list").await.expect("exists"));

    cache.invalidate(&acme, "projects").await;
    assert!(!cache.exists(&acme, "projects:list").await.expect("exists"));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(cache.exists(&acme, "projects:list").await.expect("exists"));

    shutdown_tx.send(true).expect("task is listening");
    let snapshot = task.await.expect("no panic").snapshot();
    assert_eq!(snapshot.warmed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_enqueued_failure_is_counted_not_cached() {
    let cache = Arc::new(memory_cache());
    let acme = tenant("acme");

    let config = warm_config(600);
    let (handle, commands_rx) = warming_channel(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(cache_warming_task(
        Arc::clone(&cache),
        Vec::new(),
        config,
        commands_rx,
        shutdown_rx,
    ));

    handle
        .enqueue(WarmSpec::new(
            acme.clone(),
            "estimates:1",
            CacheOptions::new(),
            || async { Err("db down".to_string()) },
        ))
        .expect("queue has room");
    drop(handle);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!cache.exists(&acme, "estimates:1").await.expect("exists"));

    shutdown_tx.send(true).expect("task is listening");
    let snapshot = task.await.expect("no panic").snapshot();
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.warmed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_warming_skipped_while_disabled() {
    let cache = Arc::new(TenantCache::new(
        Arc::new(estimo_cache::InMemoryStore::new()),
        &CacheSettings::default().with_enabled(false),
    ));
    let acme = tenant("acme");
    let hot = vec![WarmSpec::new(acme, "k", CacheOptions::new(), || async {
        Ok(json!(1))
    })];

    let config = warm_config(60);
    let (_handle, commands_rx) = warming_channel(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(cache_warming_task(
        Arc::clone(&cache),
        hot,
        config,
        commands_rx,
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown_tx.send(true).expect("task is listening");
    let snapshot = task.await.expect("no panic").snapshot();

    assert_eq!(snapshot.skipped, 1);
    assert_eq!(cache.stats().await.total_keys, 0);
}

#[tokio::test(start_paused = true)]
async fn test_warm_with_failed_write_is_not_counted_warmed() {
    let (cache, store) = faulty_cache();
    let cache = Arc::new(cache);
    let acme = tenant("acme");
    store.fail_set(true);
    let hot = vec![WarmSpec::new(
        acme.clone(),
        "materials:list",
        CacheOptions::new().depends_on("materials"),
        || async { Ok(json!(["Concrete"])) },
    )];

    let config = warm_config(60);
    let (_handle, commands_rx) = warming_channel(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(cache_warming_task(
        Arc::clone(&cache),
        hot,
        config,
        commands_rx,
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown_tx.send(true).expect("task is listening");
    let snapshot = task.await.expect("no panic").snapshot();

    assert_eq!(snapshot.warmed, 0);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(cache.index().key_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_warm_interval_does_not_panic() {
    let cache = Arc::new(memory_cache());
    let acme = tenant("acme");
    let hot = vec![WarmSpec::new(acme.clone(), "k", CacheOptions::new(), || async {
        Ok(json!(1))
    })];

    let config = WarmingConfig {
        interval: Duration::ZERO,
        queue_capacity: 4,
    };
    let (_handle, commands_rx) = warming_channel(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(cache_warming_task(
        Arc::clone(&cache),
        hot,
        config,
        commands_rx,
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(cache.exists(&acme, "k").await.expect("exists"));

    shutdown_tx.send(true).expect("task is listening");
    let snapshot = task.await.expect("no panic").snapshot();
    assert_eq!(snapshot.warmed, 1);
    assert_eq!(snapshot.cycles, 1);
}
