//! Error types for sqlx-sqlite-migration-lock

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::record::LockRecord;

/// Errors that may occur when acquiring or releasing a migration lock
#[derive(Error, Debug)]
pub enum Error {
   /// IO error reading, creating or removing the lock file
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// The lock record could not be encoded or decoded
   #[error("Invalid lock record: {0}")]
   Record(#[from] serde_json::Error),

   /// Another live owner kept the lock for the whole acquire timeout
   #[error("Timed out after {waited:?} waiting for migration lock {}{}", .path.display(), holder_suffix(.holder))]
   LockTimeout {
      path: PathBuf,
      waited: Duration,
      /// Last record seen in the lock file, if it could be read
      holder: Option<Box<LockRecord>>,
   },

   /// Release was refused because the lock file names a different owner
   #[error("Migration lock {} is not held by this process{}", .path.display(), holder_suffix(.holder))]
   NotOwner {
      path: PathBuf,
      holder: Option<Box<LockRecord>>,
   },

   /// Lock configuration failed validation
   #[error("Invalid lock configuration: {0}")]
   InvalidConfig(String),
}

fn holder_suffix(holder: &Option<Box<LockRecord>>) -> String {
   match holder {
      Some(record) => format!(" (held by pid {} on {})", record.pid, record.host),
      None => String::new(),
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
