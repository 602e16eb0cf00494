use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A one-shot latch with observable state.
///
/// The first [`set`][Latch::set] wins; later calls are no-ops. Any number
/// of tasks can [`wait`][Latch::wait], and the state can be inspected
/// without awaiting.
pub(crate) struct Latch<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    state: Mutex<Option<T>>,
    notify: Notify,
}

impl<T: Clone> Latch<T> {
    pub fn new() -> Latch<T> {
        Latch {
            inner: Arc::new(Inner {
                state: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolve the latch. Returns `false` if it was already resolved.
    pub fn set(&self, value: T) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.is_some() {
                return false;
            }
            *state = Some(value);
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn get(&self) -> Option<T> {
        self.inner.state.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.state.lock().is_some()
    }

    pub async fn wait(&self) -> T {
        loop {
            // registering interest before the check closes the race with a
            // concurrent set
            let notified = self.inner.notify.notified();
            if let Some(value) = self.get() {
                return value;
            }
            notified.await;
        }
    }
}

impl<T> Clone for Latch<T> {
    fn clone(&self) -> Self {
        Latch { inner: self.inner.clone() }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Latch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Latch").field(&*self.inner.state.lock()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn first_set_wins() {
        let latch = Latch::new();
        assert!(!latch.is_set());
        assert!(latch.set(1));
        assert!(!latch.set(2));
        assert_eq!(latch.get(), Some(1));
        assert_eq!(latch.wait().await, 1);
    }

    #[tokio::test]
    async fn wakes_pending_waiters() {
        let latch = Latch::new();
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };
        tokio::task::yield_now().await;
        latch.set("done");
        assert_eq!(waiter.await.unwrap(), "done");
    }
}
