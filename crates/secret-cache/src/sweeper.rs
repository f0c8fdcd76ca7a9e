//! Background expiry sweep
//!
//! Periodically collects eviction records from the cache and hands them to a
//! cleanup handler. The handler runs on the blocking pool with no cache lock
//! held, so slow filesystem cleanup never stalls `put`/`take` or request tasks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::cache::{Eviction, SecretCache};

/// Spawn a task that sweeps `cache` every `interval`.
///
/// `handler` is called once per eviction record. It has no way to report
/// failure back into the loop. With unwinding panics, a panic is caught per
/// record and logged, and the rest of the batch is still delivered. Under
/// `panic = "abort"` (the release profile) a handler panic aborts the process.
pub fn spawn_sweep_task<V, F>(
    cache: Arc<SecretCache<V>>,
    interval: Duration,
    handler: F,
) -> tokio::task::JoinHandle<()>
where
    V: Clone + Send + 'static,
    F: Fn(Eviction<V>) + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; nothing can have expired yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_once(&cache, &handler).await;
        }
    })
}

async fn sweep_once<V, F>(cache: &SecretCache<V>, handler: &Arc<F>)
where
    V: Clone + Send + 'static,
    F: Fn(Eviction<V>) + Send + Sync + 'static,
{
    let evictions = cache.sweep();
    if evictions.is_empty() {
        return;
    }

    let handler = Arc::clone(handler);
    let result = tokio::task::spawn_blocking(move || {
        for eviction in evictions {
            let reason = eviction.reason.label();
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(eviction))).is_err() {
                warn!(reason, "eviction handler panicked, continuing with next record");
            }
        }
    })
    .await;

    if let Err(e) = result {
        warn!(error = %e, "eviction handler failed, continuing sweep loop");
    }
}
