//! # sqlx-sqlite-migration-lock
//!
//! Serializes schema migrations across independently started processes that
//! share one SQLite database file.
//!
//! ## Core Types
//!
//! - **[`MigrationLock`]**: Exclusive lock file next to the database with retry, timeout and
//!   stale-lock reclamation
//! - **[`LockRecord`]**: Owner pid, host, creation time and database, stored as JSON in the file
//! - **[`LockConfig`]**: Timeout, retry interval, staleness ceiling and signal cleanup
//! - **[`Error`]**: Error type for lock operations
//!
//! ## Staleness
//!
//! A lock left behind by a crashed process must not block every later start.
//! A competitor removes the lock when it is older than
//! [`LockConfig::stale_after`], or when it names a pid on this host that no
//! longer exists. Locks from other hosts are only ever aged out.
//!
//! ## Interrupts
//!
//! With [`LockConfig::release_on_signal`] set, SIGINT or SIGTERM removes every
//! lock file this process still holds and then terminates the process with
//! the same signal. This stays in effect after the locks are released.

mod config;
mod error;
mod lock;
mod process;
mod record;
mod signals;

pub use config::LockConfig;
pub use error::{Error, Result};
pub use lock::{MigrationLock, StaleReason, lock_path_for};
pub use process::{current_host, is_process_alive};
pub use record::LockRecord;
