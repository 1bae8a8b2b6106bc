//! The lock handle: one acquisition attempt against a shared store.
//!
//! All mutual exclusion is delegated to the atomicity of the store's four
//! primitives. A handle owns the local state of one attempt (key, the
//! record it last wrote, a held flag) and is used by one logical caller;
//! it is not meant to be shared across threads.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nanoid::nanoid;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::store::{KeyValueStore, StoreError};
use crate::types::{FailurePolicy, LockOptions, LockRecord};

/// Upper bound (exclusive) on the random jitter added to each poll, in
/// milliseconds. Desynchronizes contenders that woke up together.
const POLL_JITTER_MS: u64 = 10;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Why `acquire` gave up, other than running out its wait budget
/// (timeout is the `Ok(false)` result, not an error).
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The handle's cancel token was signalled during the wait.
    #[error("lock acquisition cancelled")]
    Cancelled,
    /// A store call failed and the handle runs fail-closed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A single lock attempt over a named resource.
pub struct LockHandle {
    store: Arc<dyn KeyValueStore>,
    key: String,
    options: LockOptions,
    /// Random per-handle token embedded in every record this handle writes.
    owner: String,
    /// The record this handle last wrote; authoritative for its own
    /// release check.
    record: Option<LockRecord>,
    held: bool,
    cancel: CancelToken,
}

impl LockHandle {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self::with_options(store, key, LockOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        options: LockOptions,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            options,
            owner: nanoid!(),
            record: None,
            held: false,
            cancel: CancelToken::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Clone of this handle's cancel token, for signalling an in-flight
    /// `acquire` from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Try to take the lock, waiting up to `acquire_timeout`.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` once the wait budget is
    /// exhausted, `Err(AcquireError::Cancelled)` if the cancel token fires
    /// during a wait. Store errors surface only under
    /// [`FailurePolicy::FailClosed`].
    pub fn acquire(&mut self) -> Result<bool, AcquireError> {
        let ttl_ms = self.options.ttl.as_millis() as u64;
        let poll_ms = self.options.poll_interval.as_millis() as u64;
        let mut budget_ms = self.options.acquire_timeout.as_millis() as i64;

        loop {
            if self.cancel.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }

            // Expiry lands 1ms past now + ttl to guard clock-equal edges.
            let candidate = LockRecord::new(now_ms() + ttl_ms + 1, self.owner.clone());
            let encoded = candidate.encode();

            let created = self.guarded(
                self.store.set_if_absent(&self.key, &encoded),
                "set_if_absent",
                false,
            )?;
            if created {
                debug!(key = %self.key, expires_at_ms = candidate.expires_at_ms, "lock acquired");
                self.record = Some(candidate);
                self.held = true;
                return Ok(true);
            }

            // Key exists. Steal only if the current record is abandoned.
            let current = self.guarded(self.store.get(&self.key), "get", None)?;
            if let Some(current) = current {
                // An unparseable record can never expire on its own, so it
                // counts as abandoned.
                let abandoned = LockRecord::parse(&current)
                    .map(|r| r.is_expired(now_ms()))
                    .unwrap_or(true);
                if abandoned {
                    let previous = self.guarded(
                        self.store.get_and_replace(&self.key, &encoded),
                        "get_and_replace",
                        None,
                    )?;
                    // The swap wins only if nobody raced in between our
                    // read and our replace.
                    if previous.as_deref() == Some(current.as_str()) {
                        debug!(key = %self.key, stale = %current, "stole abandoned lock");
                        self.record = Some(candidate);
                        self.held = true;
                        return Ok(true);
                    }
                }
            }

            budget_ms -= poll_ms as i64;
            if budget_ms < 0 {
                debug!(key = %self.key, "acquire timed out");
                return Ok(false);
            }

            let jitter = rand::thread_rng().gen_range(0..POLL_JITTER_MS);
            if self.cancel.sleep(Duration::from_millis(poll_ms + jitter)) {
                return Err(AcquireError::Cancelled);
            }
        }
    }

    /// Give the lock back.
    ///
    /// Deletes the store record only when it is still this handle's own;
    /// a record superseded by a steal belongs to someone else and is left
    /// alone. Local state is cleared unconditionally, so calling this
    /// twice is a no-op the second time.
    pub fn release(&mut self) -> Result<(), StoreError> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        let expected = match self.record.take() {
            Some(record) => record.encode(),
            None => return Ok(()),
        };

        let result = (|| {
            match self.store.get(&self.key)? {
                Some(current) if current == expected => {
                    self.store.delete(&self.key)?;
                }
                Some(_) => {
                    debug!(key = %self.key, "lock superseded since expiry, leaving record");
                }
                None => {}
            }
            Ok(())
        })();

        match result {
            Err(err) if self.options.failure_policy == FailurePolicy::FailOpen => {
                warn!(key = %self.key, error = %err, "store call failed during release");
                Ok(())
            }
            other => other,
        }
    }

    /// Scoped acquisition: run `critical` only if the lock was taken, and
    /// release unconditionally afterward. `Ok(None)` means the lock could
    /// not be acquired and the critical section did not run.
    pub fn with_lock<T>(&mut self, critical: impl FnOnce() -> T) -> Result<Option<T>, AcquireError> {
        if !self.acquire()? {
            return Ok(None);
        }
        let out = critical();
        self.release()?;
        Ok(Some(out))
    }

    /// Apply the failure policy to one store call.
    fn guarded<T>(
        &self,
        result: Result<T, StoreError>,
        op: &'static str,
        miss: T,
    ) -> Result<T, AcquireError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => match self.options.failure_policy {
                FailurePolicy::FailOpen => {
                    warn!(key = %self.key, op, error = %err, "store call failed, treating as miss");
                    Ok(miss)
                }
                FailurePolicy::FailClosed => Err(AcquireError::Store(err)),
            },
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.held {
            if let Err(err) = self.release() {
                warn!(key = %self.key, error = %err, "failed to release lock on drop");
            }
        }
    }
}
