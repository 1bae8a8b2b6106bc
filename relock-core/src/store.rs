use thiserror::Error;

/// Error surfaced by a store backend. The handle decides, per its
/// [`FailurePolicy`](crate::types::FailurePolicy), whether these escalate
/// or degrade to a miss.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or opened.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// An individual operation failed inside the backend.
    #[error("store operation failed: {0}")]
    Backend(String),
}

/// Contract every lock store backend implements.
///
/// Each operation must be indivisible with respect to concurrent callers,
/// in-process and cross-process alike; the lock protocol has no other
/// synchronization. Methods take `&self`; backends carry their own
/// interior synchronization so one store can be shared across handles.
pub trait KeyValueStore: Send + Sync {
    /// Write `value` at `key` only if the key is absent. Returns whether
    /// the write happened.
    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Read the current value at `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` at `key` unconditionally, returning whatever value
    /// (if any) it overwrote, as one atomic read-modify-write.
    fn get_and_replace(&self, key: &str, value: &str) -> Result<Option<String>, StoreError>;

    /// Remove `key`. Returns whether a record was removed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
}
