//! Configuration for the migration lock

use std::time::Duration;

use crate::{Error, Result};

/// Configuration for a [`MigrationLock`](crate::MigrationLock)
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_migration_lock::LockConfig;
/// use std::time::Duration;
///
/// let config = LockConfig::new()
///     .with_timeout(Duration::from_secs(10))
///     .with_release_on_signal(true);
/// ```
#[derive(Debug, Clone)]
pub struct LockConfig {
   /// Overall time `acquire()` keeps retrying before failing
   ///
   /// Default: 30 seconds
   pub timeout: Duration,

   /// Pause between attempts while another owner holds the lock
   ///
   /// Default: 100 milliseconds
   pub retry_interval: Duration,

   /// Locks older than this are stale whoever owns them
   ///
   /// Default: 15 minutes
   pub stale_after: Duration,

   /// Remove the lock file on SIGINT/SIGTERM while the lock is held
   ///
   /// The process still terminates with the signal, held lock or not, for
   /// as long as it runs. Leave this off in processes that handle these
   /// signals themselves, and release the lock from that handler instead.
   ///
   /// Default: false
   pub release_on_signal: bool,
}

impl Default for LockConfig {
   fn default() -> Self {
      Self {
         timeout: Duration::from_secs(30),
         retry_interval: Duration::from_millis(100),
         stale_after: Duration::from_secs(15 * 60),
         release_on_signal: false,
      }
   }
}

impl LockConfig {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_timeout(mut self, timeout: Duration) -> Self {
      self.timeout = timeout;
      self
   }

   pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
      self.retry_interval = retry_interval;
      self
   }

   pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
      self.stale_after = stale_after;
      self
   }

   pub fn with_release_on_signal(mut self, release_on_signal: bool) -> Self {
      self.release_on_signal = release_on_signal;
      self
   }

   pub fn validate(&self) -> Result<()> {
      if self.retry_interval.is_zero() {
         return Err(Error::InvalidConfig(
            "retry_interval must be greater than zero".into(),
         ));
      }
      if self.stale_after.is_zero() {
         return Err(Error::InvalidConfig(
            "stale_after must be greater than zero".into(),
         ));
      }
      Ok(())
   }
}
