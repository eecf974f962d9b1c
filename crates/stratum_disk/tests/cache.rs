// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for `DiskCacheProvider`.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use stratum_disk::DiskCacheProvider;
use stratum_tier::{CacheEntryOptions, CacheProvider, ErrorKind, Priority, Tier, testing::LogCapture};
use tempfile::TempDir;
use tick::{Clock, ClockControl};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Document {
    title: String,
    body: Vec<u8>,
}

fn document(title: &str) -> Document {
    Document {
        title: title.to_string(),
        body: title.bytes().rev().collect(),
    }
}

fn key(name: &str) -> String {
    name.to_string()
}

fn cache_in(dir: &Path, clock: Clock, limit: u64) -> DiskCacheProvider<String, String> {
    DiskCacheProvider::builder(clock)
        .directory(dir)
        .disk_limit_bytes(limit)
        .build()
        .expect("valid configuration")
}

/// Every value written by these tests has the same length.
fn value(index: usize) -> String {
    format!("value-{index:04}")
}

/// Records embed their key, so fixed-length keys keep record lengths equal too.
fn numbered(prefix: char, index: usize) -> String {
    format!("{prefix}{index:02}")
}

async fn record_len() -> u64 {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);
    cache.set(&numbered('k', 0), value(0), &CacheEntryOptions::new()).await.expect("set failed");
    cache.statistics().await.disk_used_bytes
}

#[tokio::test]
async fn set_then_get_round_trips_structured_values() {
    let dir = TempDir::new().expect("temp dir");
    let cache = DiskCacheProvider::<String, Document>::builder(Clock::new_frozen())
        .directory(dir.path())
        .build()
        .expect("valid configuration");

    cache
        .set(&key("doc"), document("report"), &CacheEntryOptions::standard())
        .await
        .expect("set failed");

    assert_eq!(cache.get(&key("doc")).await.expect("get failed"), Some(document("report")));
    assert!(cache.directory().starts_with(dir.path()));
    assert!(cache.path_for(&key("doc")).exists());
}

#[tokio::test]
async fn values_survive_a_new_provider_instance() {
    let dir = TempDir::new().expect("temp dir");
    cache_in(dir.path(), Clock::new_frozen(), u64::MAX)
        .set(&key("persisted"), value(1), &CacheEntryOptions::new())
        .await
        .expect("set failed");

    let reopened = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);
    assert_eq!(reopened.get(&key("persisted")).await.expect("get failed"), Some(value(1)));
}

#[tokio::test]
async fn memory_only_writes_are_ignored() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);

    let options = CacheEntryOptions::new().with_tier(Tier::MemoryOnly);
    cache.set(&key("m"), value(1), &options).await.expect("set failed");

    assert!(cache.get(&key("m")).await.expect("get failed").is_none());
    assert!(!cache.path_for(&key("m")).exists());
}

#[tokio::test]
async fn absolute_expiration_in_the_past_is_a_miss() {
    let dir = TempDir::new().expect("temp dir");
    let clock = Clock::new_frozen_at(SystemTime::UNIX_EPOCH + Duration::from_secs(3600));
    let cache = cache_in(dir.path(), clock.clone(), u64::MAX);

    let options = CacheEntryOptions::new().with_absolute_expiration(clock.system_time() - Duration::from_secs(1));
    cache.set(&key("stale"), value(1), &options).await.expect("set failed");

    assert!(cache.get(&key("stale")).await.expect("get failed").is_none());
    assert!(!cache.path_for(&key("stale")).exists());
}

#[tokio::test]
async fn sliding_expiration_is_refreshed_by_reads() {
    let dir = TempDir::new().expect("temp dir");
    let control = ClockControl::new();
    let cache = cache_in(dir.path(), control.to_clock(), u64::MAX);
    let options = CacheEntryOptions::new().with_sliding_expiration(Duration::from_millis(100));

    cache.set(&key("s"), value(1), &options).await.expect("set failed");

    control.advance(Duration::from_millis(50));
    assert!(cache.get(&key("s")).await.expect("get failed").is_some());

    control.advance(Duration::from_millis(90));
    assert!(cache.get(&key("s")).await.expect("get failed").is_some());

    // Existence checks do not extend the window.
    control.advance(Duration::from_millis(60));
    assert!(cache.contains_key(&key("s")).await.expect("contains failed"));

    control.advance(Duration::from_millis(200));
    assert!(cache.get(&key("s")).await.expect("get failed").is_none());
}

#[tokio::test]
async fn remove_and_contains_key() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);

    cache.set(&key("a"), value(1), &CacheEntryOptions::new()).await.expect("set failed");
    assert!(cache.contains_key(&key("a")).await.expect("contains failed"));

    assert!(cache.remove(&key("a")).await.expect("remove failed"));
    assert!(!cache.remove(&key("a")).await.expect("remove failed"));
    assert!(!cache.contains_key(&key("a")).await.expect("contains failed"));
}

#[tokio::test]
async fn clear_is_idempotent_and_removes_temporary_files() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);
    cache.clear().await.expect("clear on a missing directory failed");

    for index in 0..3 {
        cache.set(&format!("k{index}"), value(index), &CacheEntryOptions::new()).await.expect("set failed");
    }
    let leftover = cache.directory().join("k0_deadbeef.cache.0000000000000001.tmp");
    std::fs::write(&leftover, b"partial").expect("write temp file");

    cache.clear().await.expect("clear failed");
    cache.clear().await.expect("second clear failed");

    for index in 0..3 {
        assert!(cache.get(&format!("k{index}")).await.expect("get failed").is_none());
    }
    assert!(!leftover.exists());
    assert_eq!(cache.statistics().await.file_count, 0);
}

#[tokio::test]
async fn purge_keeps_records() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);
    cache.set(&key("kept"), value(1), &CacheEntryOptions::new()).await.expect("set failed");

    let leftover = cache.directory().join("kept.cache.00000000000000ff.tmp");
    std::fs::write(&leftover, b"partial").expect("write temp file");

    cache.purge_temporary_files().await;

    assert!(!leftover.exists());
    assert_eq!(cache.get(&key("kept")).await.expect("get failed"), Some(value(1)));
}

#[tokio::test]
async fn truncated_file_is_a_miss_and_is_deleted() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);
    cache.set(&key("c"), value(1), &CacheEntryOptions::new()).await.expect("set failed");

    let path = cache.path_for(&key("c"));
    let bytes = std::fs::read(&path).expect("read record");
    std::fs::write(&path, &bytes[..bytes.len() / 2]).expect("truncate record");

    assert!(cache.get(&key("c")).await.expect("get must not fail").is_none());
    assert!(!path.exists());
    assert!(!cache.contains_key(&key("c")).await.expect("contains failed"));
    capture.assert_contains("cache.corrupted");
}

#[tokio::test]
async fn garbage_file_is_a_miss() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);

    let path = cache.path_for(&key("g"));
    std::fs::create_dir_all(cache.directory()).expect("create directory");
    std::fs::write(&path, b"definitely not a cache record").expect("write garbage");

    assert!(!cache.contains_key(&key("g")).await.expect("contains failed"));
    assert!(!path.exists());
}

#[tokio::test]
async fn record_of_another_type_is_a_miss() {
    let dir = TempDir::new().expect("temp dir");
    let strings = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);
    strings.set(&key("typed"), value(1), &CacheEntryOptions::new()).await.expect("set failed");

    // Same directory and file, different value type.
    let documents = DiskCacheProvider::<String, Document>::builder(Clock::new_frozen())
        .directory(dir.path())
        .build()
        .expect("valid configuration");
    std::fs::create_dir_all(documents.directory()).expect("create directory");
    std::fs::copy(strings.path_for(&key("typed")), documents.path_for(&key("typed"))).expect("copy record");

    assert!(documents.get(&key("typed")).await.expect("get must not fail").is_none());
    assert!(!documents.path_for(&key("typed")).exists());
}

#[tokio::test]
async fn record_written_for_another_key_is_a_miss() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);
    let (a, b) = (key("https://example.com/a"), key("https://example.com/b"));

    cache.set(&a, "value-of-a".to_string(), &CacheEntryOptions::new()).await.expect("set failed");
    // Both keys now resolve to one file, as when their file names collide.
    std::fs::copy(cache.path_for(&a), cache.path_for(&b)).expect("copy record");

    assert_eq!(cache.get(&b).await.expect("get failed"), None);
    assert!(!cache.contains_key(&b).await.expect("contains failed"));
    assert!(!cache.remove(&b).await.expect("remove failed"));
    assert!(cache.path_for(&b).exists());

    cache.set(&b, "value-of-b".to_string(), &CacheEntryOptions::new()).await.expect("set failed");
    assert_eq!(cache.get(&b).await.expect("get failed").as_deref(), Some("value-of-b"));
    assert_eq!(cache.get(&a).await.expect("get failed").as_deref(), Some("value-of-a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_see_whole_values() {
    let dir = TempDir::new().expect("temp dir");
    let cache = Arc::new(cache_in(dir.path(), Clock::new_frozen(), u64::MAX));
    let shared = key("shared");
    let written: Vec<String> = (0..50).map(|index| value(index).repeat(20)).collect();
    cache.set(&shared, written[0].clone(), &CacheEntryOptions::new()).await.expect("set failed");

    let writer = {
        let cache = Arc::clone(&cache);
        let shared = shared.clone();
        let written = written.clone();
        tokio::spawn(async move {
            for value in written {
                cache.set(&shared, value, &CacheEntryOptions::new()).await.expect("set failed");
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let shared = shared.clone();
            let written = written.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let seen = cache.get(&shared).await.expect("get failed").expect("value was never removed");
                    assert!(written.contains(&seen), "torn read: {seen}");
                }
            })
        })
        .collect();

    writer.await.expect("writer panicked");
    for reader in readers {
        reader.await.expect("reader panicked");
    }
    assert_eq!(cache.get(&shared).await.expect("get failed").as_ref(), written.last());
}

#[tokio::test]
async fn io_failures_degrade_to_misses() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let dir = TempDir::new().expect("temp dir");
    // A plain file where the cache directory should be.
    std::fs::write(dir.path().join("String"), b"in the way").expect("write blocker");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);

    cache.set(&key("a"), value(1), &CacheEntryOptions::new()).await.expect("set must not fail");
    assert!(cache.get(&key("a")).await.expect("get must not fail").is_none());
    capture.assert_contains("cache.error");
}

#[tokio::test]
async fn statistics_scan_failure_is_logged() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let dir = TempDir::new().expect("temp dir");
    std::fs::write(dir.path().join("String"), b"in the way").expect("write blocker");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);

    let stats = cache.statistics().await;
    assert_eq!(stats.file_count, 0);
    assert_eq!(stats.disk_used_bytes, 0);
    capture.assert_contains("cache.statistics");
    capture.assert_contains("cache.error");
}

#[tokio::test]
async fn quota_evicts_least_recently_used_records() {
    let record = record_len().await;
    let dir = TempDir::new().expect("temp dir");
    let control = ClockControl::new();
    let limit = 3 * record + record / 2;
    let cache = cache_in(dir.path(), control.to_clock(), limit);

    for index in 0..3 {
        control.advance(Duration::from_secs(1));
        cache.set(&numbered('k', index), value(index), &CacheEntryOptions::new()).await.expect("set failed");
    }

    // Reading k00 makes k01 the least recently used record.
    control.advance(Duration::from_secs(1));
    assert!(cache.get(&numbered('k', 0)).await.expect("get failed").is_some());

    control.advance(Duration::from_secs(1));
    cache.set(&numbered('k', 3), value(3), &CacheEntryOptions::new()).await.expect("set failed");

    assert!(cache.contains_key(&numbered('k', 0)).await.expect("contains failed"));
    assert!(!cache.contains_key(&numbered('k', 1)).await.expect("contains failed"));
    assert!(cache.contains_key(&numbered('k', 2)).await.expect("contains failed"));
    assert!(cache.contains_key(&numbered('k', 3)).await.expect("contains failed"));
    assert!(cache.statistics().await.disk_used_bytes <= limit);
}

#[tokio::test]
async fn usage_stays_within_quota() {
    let record = record_len().await;
    let dir = TempDir::new().expect("temp dir");
    let control = ClockControl::new();
    let limit = 4 * record;
    let cache = cache_in(dir.path(), control.to_clock(), limit);

    for index in 0..12 {
        control.advance(Duration::from_secs(1));
        cache.set(&numbered('k', index), value(index), &CacheEntryOptions::new()).await.expect("set failed");

        let stats = cache.statistics().await;
        assert!(stats.disk_used_bytes <= limit, "usage {} exceeds quota {limit}", stats.disk_used_bytes);
    }

    assert_eq!(cache.statistics().await.file_count, 4);
}

#[tokio::test]
async fn pinned_and_high_priority_records_survive_light_pressure() {
    let capture = LogCapture::new();
    let _guard = tracing::subscriber::set_default(capture.subscriber());

    let record = record_len().await;
    let dir = TempDir::new().expect("temp dir");
    let control = ClockControl::new();
    let cache = cache_in(dir.path(), control.to_clock(), 2 * record + record / 2);

    control.advance(Duration::from_secs(1));
    let pinned = CacheEntryOptions::new().with_priority(Priority::NeverRemove);
    cache.set(&key("pinned"), value(1), &pinned).await.expect("set failed");

    control.advance(Duration::from_secs(1));
    let high = CacheEntryOptions::new().with_priority(Priority::High);
    cache.set(&key("high"), value(2), &high).await.expect("set failed");

    // Nothing is evictable, so the write goes over quota with a warning.
    control.advance(Duration::from_secs(1));
    cache.set(&key("normal"), value(3), &CacheEntryOptions::new()).await.expect("set failed");

    assert!(cache.contains_key(&key("pinned")).await.expect("contains failed"));
    assert!(cache.contains_key(&key("high")).await.expect("contains failed"));
    assert!(cache.contains_key(&key("normal")).await.expect("contains failed"));
    capture.assert_contains("cache.over_budget");
}

#[tokio::test]
async fn high_priority_records_are_a_last_resort() {
    let record = record_len().await;
    let dir = TempDir::new().expect("temp dir");
    let control = ClockControl::new();
    let cache = cache_in(dir.path(), control.to_clock(), 12 * record + record / 2);
    let high = CacheEntryOptions::new().with_priority(Priority::High);

    for index in 0..12 {
        control.advance(Duration::from_secs(1));
        cache.set(&numbered('h', index), value(index), &high).await.expect("set failed");
    }

    control.advance(Duration::from_secs(1));
    cache.set(&key("normal"), value(99), &CacheEntryOptions::new()).await.expect("set failed");

    assert!(!cache.contains_key(&numbered('h', 0)).await.expect("contains failed"));
    assert!(cache.contains_key(&numbered('h', 1)).await.expect("contains failed"));
    assert!(cache.contains_key(&key("normal")).await.expect("contains failed"));
}

#[tokio::test]
async fn empty_key_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);

    let error = cache
        .set(&String::new(), value(1), &CacheEntryOptions::new())
        .await
        .expect_err("empty key should fail");
    assert_eq!(error.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn get_or_create_is_single_flight() {
    let dir = TempDir::new().expect("temp dir");
    let cache = Arc::new(cache_in(dir.path(), Clock::new_frozen(), u64::MAX));
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_create(
                        &key("cold"),
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            value(7)
                        },
                        &CacheEntryOptions::new(),
                    )
                    .await
                    .expect("get_or_create failed")
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.expect("task panicked"), value(7));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_or_empty_factories_are_not_cached() {
    let dir = TempDir::new().expect("temp dir");
    let cache = cache_in(dir.path(), Clock::new_frozen(), u64::MAX);

    let error = cache
        .try_get_or_create(
            &key("f"),
            || async { Err::<String, _>(std::io::Error::other("unavailable")) },
            &CacheEntryOptions::new(),
        )
        .await
        .expect_err("factory error should propagate");
    assert_eq!(error.kind(), ErrorKind::Factory);

    let created = cache
        .get_or_create_optional(&key("f"), || async { None }, &CacheEntryOptions::new())
        .await
        .expect("get_or_create_optional failed");
    assert!(created.is_none());
    assert!(!cache.path_for(&key("f")).exists());

    let created = cache
        .get_or_create_optional(&key("f"), || async { Some(value(5)) }, &CacheEntryOptions::new())
        .await
        .expect("get_or_create_optional failed");
    assert_eq!(created, Some(value(5)));
    assert_eq!(cache.get(&key("f")).await.expect("get failed"), Some(value(5)));
}
