mod options;
mod record;

pub use options::{FailurePolicy, LockOptions};
pub use record::LockRecord;
