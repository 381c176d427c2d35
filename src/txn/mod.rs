//! Transaction layer: file locking, the rollback-journal commit path, and
//! the transaction manager that ties a shadow page source, a mutator, and
//! a lock together for the life of one writer scope.

pub mod journal;
pub mod lock;
pub mod manager;

pub use lock::{FileLock, LockLevel};
pub use manager::{CommitOutcome, JournalMode, Transaction};
