//! # taskboard-db
//!
//! SQLite storage for the task board service.
//!
//! [`Store::open`] brings a database up in a fixed order:
//!
//! 1. A bounded [`ConnectionPool`] is created with a [`MetricsCollector`]
//!    attached as its observer.
//! 2. Pending [`Migration`]s are applied while holding the cross-process
//!    [`MigrationLock`], so independently started processes migrate the
//!    file exactly once.
//! 3. Metrics collection and alert checks start in the background.
//!
//! Request handlers then borrow connections through the store's helpers, and
//! operators read [`PerformanceReport`]s or subscribe to alert events.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use taskboard_db::{Migration, Store, StoreConfig};
//!
//! const MIGRATIONS: &[Migration] = &[Migration::new(
//!    1,
//!    "create_tasks",
//!    "CREATE TABLE tasks (id INTEGER PRIMARY KEY, title TEXT NOT NULL)",
//! )];
//!
//! # async fn example() -> taskboard_db::Result<()> {
//! let store = Store::open("taskboard.db", StoreConfig::from_env()?, MIGRATIONS).await?;
//!
//! store
//!    .execute("INSERT INTO tasks (title) VALUES ($1)", vec![json!("Write docs")])
//!    .await?;
//! let tasks = store.fetch_all("SELECT * FROM tasks", vec![]).await?;
//! println!("{} open tasks", tasks.len());
//!
//! println!("{}", store.performance_report());
//! store.close().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod decode;
mod error;
mod migrations;
mod store;

pub use config::{
   ENV_ACQUIRE_TIMEOUT_MS, ENV_ALERT_CHECK_INTERVAL_MS, ENV_ALERT_COOLDOWN_MS,
   ENV_COLLECTION_INTERVAL_MS, ENV_ERROR_RATE_THRESHOLD, ENV_IDLE_TIMEOUT_MS,
   ENV_LOCK_RETRY_INTERVAL_MS, ENV_LOCK_TIMEOUT_MS, ENV_MIN_CONNECTIONS, ENV_PENDING_THRESHOLD,
   ENV_POOL_SIZE, ENV_UTILIZATION_THRESHOLD, StoreConfig,
};
pub use error::{Error, Result};
pub use migrations::{AppliedMigration, Migration, Migrator};
pub use store::{Store, WriteQueryResult};

pub use sqlx_sqlite_migration_lock::{LockConfig, MigrationLock};
pub use sqlx_sqlite_pool::{Connection, ConnectionPool, PoolConfig, PoolStats};
pub use sqlx_sqlite_pool_metrics::{
   AlertEvent, AlertKind, AlertStream, AlertStreamEvent, AlertThresholds, MetricsCollector,
   MetricsConfig, PerformanceReport,
};
