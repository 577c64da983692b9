//! Fetch Queue: bounded worker pool in front of the rate limiter (spec §4.6).

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Semaphore;

/// Bounded worker pool. `concurrency` is fixed at construction; no more than
/// that many submitted futures run at once. Submission order is FIFO but
/// completion order is not guaranteed.
#[derive(Clone)]
pub struct FetchQueue {
    semaphore: Arc<StdMutex<Arc<Semaphore>>>,
    concurrency: usize,
    pending: Arc<AtomicUsize>,
    waiting: Arc<AtomicUsize>,
}

impl FetchQueue {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            semaphore: Arc::new(StdMutex::new(Arc::new(Semaphore::new(concurrency)))),
            concurrency,
            pending: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for a worker slot, then runs `fut` and returns its result.
    /// Gating happens in the caller's own task, so this places no `'static`
    /// or `Send` bound on `fut` — callers that need real parallelism spawn
    /// their own tasks around `add`, and the semaphore still caps how many
    /// of those tasks may be inside `fut` at once.
    ///
    /// Returns `None` if `clear()` drops this item while it was still
    /// waiting for a slot; `fut` never runs in that case.
    pub async fn add<F, T>(&self, fut: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let semaphore = self.semaphore.lock().expect("fetch queue semaphore mutex poisoned").clone();
        let permit = semaphore.acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        let Ok(permit) = permit else {
            return None;
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        let result = fut.await;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
        Some(result)
    }

    /// Drops every item still waiting for a slot by closing the current
    /// semaphore and installing a fresh one. Items already inside `fut` keep
    /// running to completion.
    pub fn clear(&self) {
        let mut guard = self.semaphore.lock().expect("fetch queue semaphore mutex poisoned");
        guard.close();
        *guard = Arc::new(Semaphore::new(self.concurrency));
        self.waiting.store(0, Ordering::SeqCst);
    }

    /// Resolves once nothing is running and nothing is waiting for a slot.
    pub async fn on_idle(&self) {
        while self.pending() > 0 || self.size() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Number of tasks currently running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Number of tasks waiting for a worker slot.
    pub fn size(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}
