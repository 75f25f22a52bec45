//! Completion barrier with a live count readable without blocking.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
    notify: Notify,
}

/// A wait group whose outstanding count can be observed while it runs.
///
/// Each participant holds a [`BarrierGuard`]; dropping the guard releases its
/// slot exactly once, whatever path the holder exits by.
#[derive(Debug, Clone, Default)]
pub struct CompletionBarrier {
    inner: Arc<Inner>,
}

impl CompletionBarrier {
    /// Creates a barrier with no registered participants.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one participant.
    #[must_use = "dropping the guard releases the slot immediately"]
    pub fn register(&self) -> BarrierGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        BarrierGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of participants that have not released yet.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Waits until every registered participant has released.
    pub async fn wait(&self) {
        self.wait_until_at_most(0).await;
    }

    /// Waits until no more than `live` participants remain.
    pub async fn wait_until_at_most(&self, live: usize) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a release in between is not lost.
            notified.as_mut().enable();
            if self.count() <= live {
                return;
            }
            notified.await;
        }
    }
}

/// A registered slot in a [`CompletionBarrier`].
#[derive(Debug)]
pub struct BarrierGuard {
    inner: Arc<Inner>,
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        self.inner.count.fetch_sub(1, Ordering::AcqRel);
        self.inner.notify.notify_waiters();
    }
}
