//! Store configuration and environment overrides

use std::str::FromStr;
use std::time::Duration;

use sqlx_sqlite_migration_lock::LockConfig;
use sqlx_sqlite_pool::PoolConfig;
use sqlx_sqlite_pool_metrics::MetricsConfig;

use crate::{Error, Result};

pub const ENV_POOL_SIZE: &str = "TASKBOARD_DB_POOL_SIZE";
pub const ENV_MIN_CONNECTIONS: &str = "TASKBOARD_DB_MIN_CONNECTIONS";
pub const ENV_ACQUIRE_TIMEOUT_MS: &str = "TASKBOARD_DB_ACQUIRE_TIMEOUT_MS";
pub const ENV_IDLE_TIMEOUT_MS: &str = "TASKBOARD_DB_IDLE_TIMEOUT_MS";
pub const ENV_COLLECTION_INTERVAL_MS: &str = "TASKBOARD_METRICS_COLLECTION_INTERVAL_MS";
pub const ENV_ALERT_CHECK_INTERVAL_MS: &str = "TASKBOARD_METRICS_ALERT_CHECK_INTERVAL_MS";
pub const ENV_ALERT_COOLDOWN_MS: &str = "TASKBOARD_METRICS_ALERT_COOLDOWN_MS";
pub const ENV_UTILIZATION_THRESHOLD: &str = "TASKBOARD_METRICS_UTILIZATION_THRESHOLD";
pub const ENV_PENDING_THRESHOLD: &str = "TASKBOARD_METRICS_PENDING_THRESHOLD";
pub const ENV_ERROR_RATE_THRESHOLD: &str = "TASKBOARD_METRICS_ERROR_RATE_THRESHOLD";
pub const ENV_LOCK_TIMEOUT_MS: &str = "TASKBOARD_LOCK_TIMEOUT_MS";
pub const ENV_LOCK_RETRY_INTERVAL_MS: &str = "TASKBOARD_LOCK_RETRY_INTERVAL_MS";

/// Configuration for a [`Store`](crate::Store)
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use taskboard_db::StoreConfig;
///
/// let mut config = StoreConfig::default();
/// config.pool = config.pool.with_pool_size(4);
/// config.lock = config.lock.with_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
   pub pool: PoolConfig,
   pub metrics: MetricsConfig,
   /// Lock taken while migrating at startup
   ///
   /// Default: [`LockConfig::default`] with `release_on_signal` on, so an
   /// interrupted startup does not leave the lock behind
   pub lock: LockConfig,
}

impl Default for StoreConfig {
   fn default() -> Self {
      Self {
         pool: PoolConfig::default(),
         metrics: MetricsConfig::default(),
         lock: LockConfig::default().with_release_on_signal(true),
      }
   }
}

impl StoreConfig {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_pool(mut self, pool: PoolConfig) -> Self {
      self.pool = pool;
      self
   }

   pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
      self.metrics = metrics;
      self
   }

   pub fn with_lock(mut self, lock: LockConfig) -> Self {
      self.lock = lock;
      self
   }

   /// Defaults overlaid with any `TASKBOARD_*` environment variables.
   ///
   /// Durations are whole milliseconds. A variable that is set but cannot be
   /// parsed fails with [`Error::InvalidEnv`].
   pub fn from_env() -> Result<Self> {
      Self::from_lookup(|var| std::env::var(var).ok())
   }

   /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
   pub fn from_lookup<F>(lookup: F) -> Result<Self>
   where
      F: Fn(&str) -> Option<String>,
   {
      let mut config = Self::default();
      let env = Env(lookup);

      if let Some(v) = env.parse(ENV_POOL_SIZE, "a non-negative integer")? {
         config.pool.pool_size = v;
      }
      if let Some(v) = env.parse(ENV_MIN_CONNECTIONS, "a non-negative integer")? {
         config.pool.min_connections = v;
      }
      if let Some(v) = env.millis(ENV_ACQUIRE_TIMEOUT_MS)? {
         config.pool.acquire_timeout = v;
      }
      if let Some(v) = env.millis(ENV_IDLE_TIMEOUT_MS)? {
         config.pool.idle_timeout = v;
      }

      if let Some(v) = env.millis(ENV_COLLECTION_INTERVAL_MS)? {
         config.metrics.collection_interval = v;
      }
      if let Some(v) = env.millis(ENV_ALERT_CHECK_INTERVAL_MS)? {
         config.metrics.alert_check_interval = v;
      }
      if let Some(v) = env.millis(ENV_ALERT_COOLDOWN_MS)? {
         config.metrics.alert_cooldown = v;
      }
      if let Some(v) = env.parse(ENV_UTILIZATION_THRESHOLD, "a number")? {
         config.metrics.thresholds.utilization = v;
      }
      if let Some(v) = env.parse(ENV_PENDING_THRESHOLD, "a non-negative integer")? {
         config.metrics.thresholds.pending = v;
      }
      if let Some(v) = env.parse(ENV_ERROR_RATE_THRESHOLD, "a number")? {
         config.metrics.thresholds.error_rate = v;
      }

      if let Some(v) = env.millis(ENV_LOCK_TIMEOUT_MS)? {
         config.lock.timeout = v;
      }
      if let Some(v) = env.millis(ENV_LOCK_RETRY_INTERVAL_MS)? {
         config.lock.retry_interval = v;
      }

      config.validate()?;
      Ok(config)
   }

   pub fn validate(&self) -> Result<()> {
      self.pool.validate()?;
      self.metrics.validate()?;
      self.lock.validate()?;
      Ok(())
   }
}

struct Env<F>(F);

impl<F> Env<F>
where
   F: Fn(&str) -> Option<String>,
{
   fn parse<T: FromStr>(&self, var: &'static str, expected: &'static str) -> Result<Option<T>> {
      let Some(raw) = (self.0)(var) else {
         return Ok(None);
      };
      raw.trim()
         .parse()
         .map(Some)
         .map_err(|_| Error::InvalidEnv {
            var,
            value: raw,
            expected,
         })
   }

   fn millis(&self, var: &'static str) -> Result<Option<Duration>> {
      Ok(self
         .parse::<u64>(var, "a whole number of milliseconds")?
         .map(Duration::from_millis))
   }
}
