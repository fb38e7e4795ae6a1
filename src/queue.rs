//! Per-session build queue (spec §5 / Design Note §9).
//!
//! The only shared mutable structure in the engine: a mapping from
//! `sessionKey` to the tail of its build chain. An outer `std::sync::Mutex`
//! guards the `HashMap` (mutation of the map itself is a short, synchronous
//! critical section); an inner `tokio::sync::Mutex` per session serializes
//! the builds themselves without blocking builds for other sessions. This
//! mirrors the two-tier locking the teacher's scheduler uses for its job
//! bookkeeping, generalized from a single job table to per-session chains.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

/// Serializes async work per session key while letting different sessions
/// run concurrently.
#[derive(Default)]
pub struct BuildQueue {
    lanes: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl BuildQueue {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
        }
    }

    fn lane(&self, session_key: &str) -> Arc<AsyncMutex<()>> {
        let mut lanes = self.lanes.lock().expect("build queue lock poisoned");
        lanes
            .entry(session_key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Run `work` serialized against any other call for the same
    /// `session_key`. A panicking or failing `work` does not poison the
    /// lane: the next enqueued call still starts normally, since the guard
    /// is dropped unconditionally when `work` returns.
    pub async fn run<F, Fut, T>(&self, session_key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let lane = self.lane(session_key);
        let _guard = lane.lock().await;
        work().await
    }

    /// Detach `work` as a background task serialized against the same
    /// session's lane, without the caller awaiting it. Used when the
    /// manager already has an index to serve and only wants the rebuild
    /// to happen in the background (spec §5: a build never blocks a
    /// retrieval against the previously saved index).
    ///
    /// Takes the queue by owned `Arc` rather than `&Arc<Self>`: a reference
    /// to an `Arc` is not one of the receiver types stable Rust accepts for
    /// `self` (only `Self`, `&Self`, `&mut Self`, and a handful of smart
    /// pointers including `Arc<Self>` itself are). Callers clone the `Arc`
    /// at the call site, e.g. `Arc::clone(&self.queue).spawn(...)`.
    pub fn spawn<F, Fut>(self: Arc<Self>, session_key: &str, work: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let session_key = session_key.to_string();
        tokio::spawn(async move {
            let lane = self.lane(&session_key);
            let _guard = lane.lock().await;
            work().await;
        });
    }
}
