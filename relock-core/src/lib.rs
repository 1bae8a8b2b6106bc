//! # relock-core
//!
//! A client-side distributed lock over a shared atomic key-value store.
//! The store is the only synchronization point: contenders coordinate
//! through four atomic primitives (set-if-absent, get, get-and-replace,
//! delete), with expiry-based fencing against crashed holders and a
//! CAS-style equality check making theft of abandoned locks race-safe.

pub mod cancel;
pub mod handle;
pub mod store;
#[path = "store_in_memory.rs"]
pub mod store_in_memory;
#[cfg(feature = "sqlite")]
#[path = "store_sqlite.rs"]
pub mod store_sqlite;
pub mod types;

#[cfg(test)]
mod handle_test;
