use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The turn token serializing queries on one connection.
///
/// Created empty; the single permit is deposited when startup consumes the
/// first `ReadyForQuery`. Acquisition is FIFO (tokio's semaphore is fair),
/// so queries observe submission order.
pub(crate) struct QueryLock {
    sem: Arc<Semaphore>,
}

impl QueryLock {
    pub fn new() -> QueryLock {
        QueryLock { sem: Arc::new(Semaphore::new(0)) }
    }

    /// Deposit the initial token. Called exactly once.
    pub fn release_initial(&self) {
        self.sem.add_permits(1);
    }

    /// Wait for the turn token. Fails once the lock is closed.
    pub async fn acquire(&self) -> Option<QueryPermit> {
        match self.sem.clone().acquire_owned().await {
            Ok(permit) => Some(QueryPermit { inner: Some(permit) }),
            Err(_) => None,
        }
    }

    /// Reject pending and future acquisitions.
    pub fn close(&self) {
        self.sem.close();
    }
}

impl std::fmt::Debug for QueryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryLock")
            .field("available", &self.sem.available_permits())
            .finish()
    }
}

/// The held turn token.
///
/// Dropping returns the token to the queue; that must only happen with the
/// connection in the "clean" state, i.e. right after a `ReadyForQuery`.
/// [`poison`][QueryPermit::poison] retires the token instead, for paths
/// where the connection state is unknown.
pub(crate) struct QueryPermit {
    inner: Option<OwnedSemaphorePermit>,
}

impl QueryPermit {
    /// Retire the token permanently instead of releasing it.
    pub fn poison(mut self) {
        if let Some(permit) = self.inner.take() {
            permit.forget();
        }
    }
}

impl std::fmt::Debug for QueryPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPermit").finish_non_exhaustive()
    }
}
