//! Shared stop signal for in-flight speech.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A resettable "drop everything that is speaking" flag.
///
/// Unlike a `CancellationToken` it can be cleared again, which the speech
/// queue does once its worker has gone idle. The flag is an atomic so that
/// blocking playback threads can poll it without touching the runtime.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// Create a cleared signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter.
    pub fn set(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Lower the signal.
    pub fn clear(&self) {
        self.inner.flag.store(false, Ordering::SeqCst);
    }

    /// Whether the signal is currently raised.
    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the signal is raised.
    pub async fn raised(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// A clone of the raw flag for polling from blocking threads.
    pub fn flag(&self) -> StopFlag {
        StopFlag {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only view of a [`StopSignal`], cheap to move into a blocking thread.
#[derive(Debug, Clone)]
pub struct StopFlag {
    inner: Arc<Inner>,
}

impl StopFlag {
    /// Whether the signal is currently raised.
    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }
}
