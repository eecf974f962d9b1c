// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reconciliation between the memory and disk tiers.

use std::{path::Path, time::Duration};

use stratum::{CacheEntryOptions, CacheProvider, SyncReport, Tier, TwoLevelCache};
use stratum_tier::testing::LogCapture;
use tempfile::TempDir;
use tick::{Clock, ClockControl};

fn cache_in(dir: &Path) -> TwoLevelCache<String, String> {
    TwoLevelCache::builder(Clock::new_frozen())
        .directory(dir)
        .without_synchronization()
        .build()
        .expect("valid configuration")
}

fn key(name: &str) -> String {
    name.to_string()
}

#[tokio::test]
async fn memory_copy_is_dropped_when_disk_copy_is_gone() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path());

    cache.set(&key("a"), "1".to_string(), &CacheEntryOptions::new()).await.expect("set failed");
    cache.set(&key("b"), "2".to_string(), &CacheEntryOptions::new()).await.expect("set failed");
    assert!(cache.disk().remove(&key("a")).await.expect("remove failed"));

    let report = cache.synchronize().await.expect("synchronize failed");

    assert_eq!(report, SyncReport { examined: 2, evicted: 1 });
    assert!(!cache.memory().contains_key(&key("a")).await.expect("contains failed"));
    assert!(cache.memory().contains_key(&key("b")).await.expect("contains failed"));
}

#[tokio::test]
async fn promoted_entries_are_reconciled() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path());

    let options = CacheEntryOptions::new().with_tier(Tier::DiskOnly);
    cache.set(&key("p"), "v".to_string(), &options).await.expect("set failed");
    assert!(cache.get(&key("p")).await.expect("get failed").is_some());

    cache.disk().clear().await.expect("clear failed");
    let report = cache.synchronize().await.expect("synchronize failed");

    assert_eq!(report.evicted, 1);
    assert!(cache.get(&key("p")).await.expect("get failed").is_none());
}

#[tokio::test]
async fn memory_only_entries_are_left_alone() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path());

    let options = CacheEntryOptions::new().with_tier(Tier::MemoryOnly);
    cache.set(&key("m"), "v".to_string(), &options).await.expect("set failed");

    let report = cache.synchronize().await.expect("synchronize failed");

    assert_eq!(report, SyncReport::default());
    assert!(cache.memory().contains_key(&key("m")).await.expect("contains failed"));
}

#[tokio::test]
async fn entries_gone_from_memory_are_forgotten() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path());

    cache.set(&key("k"), "v".to_string(), &CacheEntryOptions::new()).await.expect("set failed");
    cache.memory().remove(&key("k")).await.expect("remove failed");

    let first = cache.synchronize().await.expect("synchronize failed");
    assert_eq!(first, SyncReport { examined: 1, evicted: 0 });

    let second = cache.synchronize().await.expect("synchronize failed");
    assert_eq!(second, SyncReport::default());
    assert!(cache.disk().contains_key(&key("k")).await.expect("contains failed"));
}

#[tokio::test]
async fn removed_keys_are_not_examined() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path());

    cache.set(&key("k"), "v".to_string(), &CacheEntryOptions::new()).await.expect("set failed");
    cache.remove(&key("k")).await.expect("remove failed");

    assert_eq!(cache.synchronize().await.expect("synchronize failed"), SyncReport::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconciliation_keeps_concurrent_memory_only_writes() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path());
    let memory_only = CacheEntryOptions::new().with_tier(Tier::MemoryOnly);

    for round in 0..100 {
        let key = format!("k{round}");
        cache.set(&key, "both".to_string(), &CacheEntryOptions::new()).await.expect("set failed");

        let pass = tokio::spawn({
            let cache = cache.clone();
            async move { cache.synchronize().await }
        });
        let write = tokio::spawn({
            let cache = cache.clone();
            let key = key.clone();
            let options = memory_only.clone();
            async move { cache.set(&key, format!("memory-{round}"), &options).await }
        });

        pass.await.expect("pass panicked").expect("synchronize failed");
        write.await.expect("write panicked").expect("set failed");

        assert_eq!(cache.get(&key).await.expect("get failed"), Some(format!("memory-{round}")));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timer_runs_reconciliation() {
    let dir = TempDir::new().expect("temp dir");
    let control = ClockControl::new();
    let interval = Duration::from_secs(60);
    let cache = TwoLevelCache::<String, String>::builder(control.to_clock())
        .directory(dir.path())
        .synchronization_interval(interval)
        .build()
        .expect("valid configuration");
    assert!(cache.is_synchronizing());

    cache.set(&key("k"), "v".to_string(), &CacheEntryOptions::new()).await.expect("set failed");
    cache.disk().remove(&key("k")).await.expect("remove failed");

    let mut reconciled = false;
    for _ in 0..200 {
        control.advance(interval);
        tokio::time::sleep(Duration::from_millis(10)).await;
        if !cache.memory().contains_key(&key("k")).await.expect("contains failed") {
            reconciled = true;
            break;
        }
    }
    assert!(reconciled, "the background pass never removed the stale memory entry");

    cache.dispose().await;
    assert!(!cache.is_synchronizing());
}

#[test]
fn timer_is_skipped_outside_a_runtime() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let dir = TempDir::new().expect("temp dir");
    let cache = TwoLevelCache::<String, String>::builder(Clock::new_frozen())
        .directory(dir.path())
        .build()
        .expect("valid configuration");

    assert!(!cache.is_synchronizing());
    capture.assert_contains("cache.unscheduled");
}
