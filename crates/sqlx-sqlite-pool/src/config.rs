//! Configuration for the SQLite connection pool

use std::time::Duration;

use crate::{Error, Result};

/// Configuration for a [`ConnectionPool`](crate::ConnectionPool)
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_pool::PoolConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just a few fields
/// let config = PoolConfig {
///     pool_size: 4,
///     acquire_timeout: Duration::from_secs(5),
///     ..Default::default()
/// };
///
/// // Or chain the builder methods
/// let config = PoolConfig::new()
///     .with_pool_size(4)
///     .with_min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
   /// Hard cap on the number of open connections, busy or idle
   ///
   /// Default: 10
   pub pool_size: usize,

   /// Connections opened eagerly by `initialize()` and never reclaimed by the
   /// idle sweep
   ///
   /// Default: 2
   pub min_connections: usize,

   /// How long a queued `acquire()` waits before failing with
   /// [`Error::AcquireTimeout`]
   ///
   /// Default: 30 seconds
   pub acquire_timeout: Duration,

   /// Idle connections unused for this long are closed by the sweep, as long
   /// as the pool stays at or above `min_connections`
   ///
   /// Default: 5 minutes
   pub idle_timeout: Duration,

   /// Interval between idle sweeps
   ///
   /// Default: 60 seconds
   pub reap_interval: Duration,

   /// SQLite busy timeout applied to every connection
   ///
   /// Default: 5 seconds
   pub busy_timeout: Duration,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         pool_size: 10,
         min_connections: 2,
         acquire_timeout: Duration::from_secs(30),
         idle_timeout: Duration::from_secs(300),
         reap_interval: Duration::from_secs(60),
         busy_timeout: Duration::from_secs(5),
      }
   }
}

impl PoolConfig {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_pool_size(mut self, pool_size: usize) -> Self {
      self.pool_size = pool_size;
      self
   }

   pub fn with_min_connections(mut self, min_connections: usize) -> Self {
      self.min_connections = min_connections;
      self
   }

   pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
      self.acquire_timeout = timeout;
      self
   }

   pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
      self.idle_timeout = timeout;
      self
   }

   pub fn with_reap_interval(mut self, interval: Duration) -> Self {
      self.reap_interval = interval;
      self
   }

   pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
      self.busy_timeout = timeout;
      self
   }

   /// Check the invariants the pool relies on.
   pub fn validate(&self) -> Result<()> {
      if self.pool_size == 0 {
         return Err(Error::InvalidConfig("pool_size must be at least 1".into()));
      }
      if self.min_connections > self.pool_size {
         return Err(Error::InvalidConfig(format!(
            "min_connections ({}) exceeds pool_size ({})",
            self.min_connections, self.pool_size
         )));
      }
      if self.reap_interval.is_zero() {
         return Err(Error::InvalidConfig(
            "reap_interval must be greater than zero".into(),
         ));
      }
      Ok(())
   }
}
