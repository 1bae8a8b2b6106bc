use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Inner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Cooperative cancellation signal for an in-flight acquisition.
///
/// Clones share the same flag. The handle sleeps between polls on this
/// token, so `cancel()` from any thread wakes a waiting `acquire` promptly
/// instead of letting it run out its poll interval or timeout.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = self.lock_flag();
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.lock_flag()
    }

    /// Sleep for up to `timeout`, waking early on cancellation.
    /// Returns true if the token was cancelled.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cancelled = self.lock_flag();
        loop {
            if *cancelled {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timed_out) = self
                .inner
                .signal
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            cancelled = guard;
        }
    }

    fn lock_flag(&self) -> std::sync::MutexGuard<'_, bool> {
        self.inner
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
