// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Periodic reconciliation between the tiers.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use futures::StreamExt;
use serde::{Serialize, de::DeserializeOwned};
use stratum_tier::{CacheActivity, CacheKey, CacheOperation};
use tick::PeriodicTimer;
use tokio::{runtime::Handle, sync::Notify, task::JoinHandle};

use crate::cache::Inner;

/// Starts reconciling `cache` every `interval` on the current Tokio runtime.
///
/// Returns `None` and logs a warning when no runtime is running.
pub(crate) fn spawn<K, V>(cache: &Arc<Inner<K, V>>, interval: Duration) -> Option<JoinHandle<()>>
where
    K: CacheKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let Ok(runtime) = Handle::try_current() else {
        cache.telemetry.record_detail(
            CacheOperation::Synchronize,
            CacheActivity::Unscheduled,
            &"no Tokio runtime is running, background synchronization is disabled",
        );
        return None;
    };

    let timer = PeriodicTimer::new(&cache.clock, interval);
    Some(runtime.spawn(run(Arc::downgrade(cache), Arc::clone(&cache.shutdown), timer)))
}

// Holds only a weak reference so that dropping the last cache handle ends the loop.
async fn run<K, V>(cache: Weak<Inner<K, V>>, shutdown: Arc<Notify>, mut timer: PeriodicTimer)
where
    K: CacheKey,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            () = shutdown.notified() => break,
            tick = timer.next() => {
                if tick.is_none() {
                    break;
                }
            }
        }

        let Some(cache) = cache.upgrade() else {
            break;
        };
        cache.synchronize().await;
    }
}
