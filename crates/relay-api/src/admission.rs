// Admission limiters
//
// Each endpoint family has an independent limiter: a concurrency cap, a
// bounded wait queue, and a queue timeout. Acquisition is cancellable (a
// disconnected client drops the future and frees its queue slot). The
// returned permit is moved into the worker task, so a request timeout
// releases capacity only when the coordinator actually unwinds.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{AdmissionConfig, ServerConfig};
use crate::error::ApiError;

/// One bounded-concurrency, bounded-queue gatekeeper
pub struct AdmissionLimiter {
    slots: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    queue_timeout: Duration,
}

impl AdmissionLimiter {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.concurrency)),
            queue: Arc::new(Semaphore::new(config.queue_size)),
            queue_timeout: config.queue_timeout,
        }
    }

    /// Run, queue, or reject: an immediate slot when available, else a
    /// bounded wait, else queue-full.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ApiError> {
        // Fast path: free slot, no queueing
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(permit);
        }

        // Queue slot; rejection here is queue-full
        let _queued = self
            .queue
            .clone()
            .try_acquire_owned()
            .map_err(|_| ApiError::queue_full())?;

        match tokio::time::timeout(self.queue_timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ApiError::internal("admission semaphore closed")),
            Err(_) => Err(ApiError::queue_timeout()),
        }
    }
}

/// The five endpoint-family limiters
pub struct Admission {
    pub llm_run: AdmissionLimiter,
    pub llm_stream: AdmissionLimiter,
    pub vector_run: AdmissionLimiter,
    pub vector_stream: AdmissionLimiter,
    pub embedding_run: AdmissionLimiter,
}

impl Admission {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            llm_run: AdmissionLimiter::new(config.llm_run),
            llm_stream: AdmissionLimiter::new(config.llm_stream),
            vector_run: AdmissionLimiter::new(config.vector_run),
            vector_stream: AdmissionLimiter::new(config.vector_stream),
            embedding_run: AdmissionLimiter::new(config.embedding_run),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(concurrency: usize, queue: usize, timeout_ms: u64) -> AdmissionLimiter {
        AdmissionLimiter::new(AdmissionConfig {
            concurrency,
            queue_size: queue,
            queue_timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[tokio::test]
    async fn grants_up_to_concurrency() {
        let limiter = limiter(2, 1, 50);
        let _a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();

        // Third waits in the queue and times out
        let err = limiter.acquire().await.unwrap_err();
        assert_eq!(err.code, "queue_timeout");
    }

    #[tokio::test]
    async fn queue_overflow_rejects_immediately() {
        let limiter = Arc::new(limiter(1, 1, 5_000));
        let _held = limiter.acquire().await.unwrap();

        // Fill the single queue slot with a waiter
        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Queue full now
        let err = limiter.acquire().await.unwrap_err();
        assert_eq!(err.code, "queue_full");

        drop(_held);
        let permit = waiter.await.unwrap();
        assert!(permit.is_ok());
    }

    #[tokio::test]
    async fn released_permit_admits_the_next_request() {
        let limiter = limiter(1, 4, 1_000);
        let first = limiter.acquire().await.unwrap();
        drop(first);
        let _second = limiter.acquire().await.unwrap();
    }
}
