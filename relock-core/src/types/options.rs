use std::time::Duration;

/// What a handle does when a store call reports an error mid-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log the error and treat the call as a miss. A persistent store
    /// outage then manifests as acquisition timeout rather than a hard
    /// failure.
    #[default]
    FailOpen,
    /// Propagate the error to the caller.
    FailClosed,
}

/// Tuning knobs for one lock handle.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// How long a held lock stays valid without release before any
    /// contender may steal it.
    pub ttl: Duration,
    /// Maximum total time `acquire` will wait before giving up.
    pub acquire_timeout: Duration,
    /// Delay between acquisition retries. A small random jitter is added
    /// on top to desynchronize contenders.
    pub poll_interval: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(60_000),
            acquire_timeout: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(100),
            failure_policy: FailurePolicy::FailOpen,
        }
    }
}

impl LockOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}
