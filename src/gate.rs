//! Concurrency gate
//!
//! Counting admission limiter for asynchronous requests. At most `ceiling`
//! wrapped futures run between admission and completion; the rest wait for a
//! permit. It does not reorder or deduplicate work.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    ceiling: usize,
}

impl ConcurrencyGate {
    /// `ceiling` is fixed for the lifetime of the gate. Zero is clamped to one.
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            permits: Arc::new(Semaphore::new(ceiling)),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Requests currently admitted
    pub fn in_flight(&self) -> usize {
        self.ceiling - self.permits.available_permits()
    }

    /// Run `fut` once a slot is free; the slot is released when it completes
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        // never closed, so acquire cannot fail
        let _permit = self.permits.acquire().await.ok();
        fut.await
    }
}
