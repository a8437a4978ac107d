// =============================================================================
// Bounded HTTP request queue
// =============================================================================
//
// Every external pull (order-book reads, token resolution, scoreboard
// fetches) goes through this queue. At most `max_concurrency` requests run
// simultaneously; once `queue_max` requests are already waiting for a slot,
// `enqueue` fails immediately rather than growing unboundedly — the same
// fail-fast posture the teacher's rate limiter takes on `can_send_request`,
// just enforced with a semaphore instead of a weight counter.
// =============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::warn;

/// Outcome of a queued unit of work that never ran because the queue was
/// saturated.
#[derive(Debug, Clone)]
pub struct Dropped {
    pub dropped_by_queue: bool,
    pub waiting: usize,
}

pub struct HttpQueue {
    semaphore: Arc<Semaphore>,
    queue_max: usize,
    waiting: Arc<AtomicU64>,
    dropped_count: AtomicU64,
}

impl HttpQueue {
    pub fn new(max_concurrency: usize, queue_max: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            queue_max,
            waiting: Arc::new(AtomicU64::new(0)),
            dropped_count: AtomicU64::new(0),
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Run `work` once a concurrency slot is available, unless the queue is
    /// already at `queue_max` waiters, in which case the work is dropped
    /// without running and `Err(Dropped)` is returned immediately.
    pub async fn enqueue<F, T>(&self, work: F) -> Result<T, Dropped>
    where
        F: Future<Output = T>,
    {
        let waiting_now = self.waiting.fetch_add(1, Ordering::SeqCst) as usize + 1;
        if waiting_now > self.queue_max {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
            warn!(waiting = waiting_now, queue_max = self.queue_max, "http queue saturated, dropping request");
            return Err(Dropped {
                dropped_by_queue: true,
                waiting: waiting_now,
            });
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed");
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        let result = work.await;
        drop(permit);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_work_under_concurrency_limit() {
        let queue = HttpQueue::new(2, 10);
        let result = queue.enqueue(async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn drops_when_waiting_exceeds_queue_max() {
        let queue = Arc::new(HttpQueue::new(1, 1));
        let permit_holder = queue.semaphore.clone().acquire_owned().await.unwrap();

        let q1 = queue.clone();
        let waiter1 = tokio::spawn(async move { q1.enqueue(async { 1 }).await });
        tokio::task::yield_now().await;

        let result = queue.enqueue(async { 2 }).await;
        assert!(result.is_err());
        assert_eq!(queue.dropped_count(), 1);

        drop(permit_holder);
        let _ = waiter1.await;
    }
}
