//! Async mutex that hands callers an explicit release handle instead of a
//! scoped guard, so the lock can be released from a different point in the
//! call graph than where it was acquired (e.g. after watcher callbacks have
//! run on a separate task).

use std::sync::Arc;

use tokio::sync::{AcquireError, Semaphore};

/// A single-permit semaphore used as a FIFO-fair async mutex.
///
/// `tokio::sync::Semaphore` wakes waiters in acquisition order, which gives
/// us the FIFO-among-waiters guarantee without hand-rolling a wait queue.
#[derive(Clone)]
pub struct AsyncMutex {
    inner: Arc<Semaphore>,
}

impl AsyncMutex {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Semaphore::new(1)),
        }
    }

    /// Suspends the caller until the mutex is free, then returns a single-use
    /// handle that releases it. Releasing twice is a programming error;
    /// `Release::release` consumes `self`, so the type system prevents it.
    pub async fn acquire(&self) -> Release {
        let permit = self
            .inner
            .clone()
            .acquire_owned()
            .await
            .unwrap_or_else(|AcquireError { .. }| {
                unreachable!("AsyncMutex never closes its semaphore")
            });
        Release { permit: Some(permit) }
    }
}

impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-use release handle returned by [`AsyncMutex::acquire`].
pub struct Release {
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl Release {
    /// Releases the mutex. Consumes the handle so it cannot be released
    /// twice.
    pub fn release(mut self) {
        self.permit.take();
    }
}
