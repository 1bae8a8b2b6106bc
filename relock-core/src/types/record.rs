use serde::{Deserialize, Serialize};

/// The value stored at a lock key: an absolute expiry instant in epoch
/// milliseconds, tagged with the random token of the handle that wrote it.
///
/// Encoded as `"<expiry_ms>:<owner>"`. The owner token is what lets two
/// handles that computed the same expiry millisecond still write distinct
/// records, so the steal and release equality checks stay unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Instant beyond which the lock is considered abandoned.
    pub expires_at_ms: u64,
    /// Random token of the writing handle. Empty for legacy bare-expiry
    /// records.
    pub owner: String,
}

impl LockRecord {
    pub fn new(expires_at_ms: u64, owner: impl Into<String>) -> Self {
        Self {
            expires_at_ms,
            owner: owner.into(),
        }
    }

    /// Canonical string form written to the store.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.expires_at_ms, self.owner)
    }

    /// Parse a stored value. A bare decimal expiry (no owner token) is
    /// accepted with an empty owner. Returns `None` for anything else;
    /// callers treat unparseable records as abandoned.
    pub fn parse(raw: &str) -> Option<Self> {
        let (expiry, owner) = match raw.split_once(':') {
            Some((expiry, owner)) => (expiry, owner),
            None => (raw, ""),
        };
        let expires_at_ms = expiry.parse::<u64>().ok()?;
        Some(Self {
            expires_at_ms,
            owner: owner.to_string(),
        })
    }

    /// A record is abandoned once its expiry instant is strictly in the
    /// past. A record expiring exactly at `now` is still live.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms < now_ms
    }
}

impl std::fmt::Display for LockRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.expires_at_ms, self.owner)
    }
}
