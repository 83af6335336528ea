//! Admission gate bounding concurrent manifest generations

use crate::error::{RepoServeError, RepoServeResult};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Counting semaphore sized by the parallelism limit.
///
/// Permits are owned, so a slot is released on every exit path when the permit
/// drops.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting `limit` generations (at least one)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> RepoServeResult<OwnedSemaphorePermit> {
        if self.semaphore.available_permits() == 0 {
            debug!("All {} generation slots busy, waiting", self.limit);
        }
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RepoServeError::Internal("concurrency limiter closed".to_string()))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
