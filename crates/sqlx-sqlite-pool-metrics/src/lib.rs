//! # sqlx-sqlite-pool-metrics
//!
//! Health metrics and alerting for [`sqlx_sqlite_pool::ConnectionPool`].
//!
//! The collector keeps running totals fed by the pool (through the
//! [`PoolObserver`](sqlx_sqlite_pool::PoolObserver) hook) or by hand, turns
//! them into timestamped [`MetricsSnapshot`]s with derived ratios, and
//! evaluates alert conditions against the latest snapshot.
//!
//! Alerts are edge-triggered: one [`AlertEvent::Raised`] when a condition
//! starts holding, silence while it keeps holding inside the cooldown window,
//! and one [`AlertEvent::Resolved`] when it clears.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqlx_sqlite_pool::{ConnectionPool, PoolConfig};
//! use sqlx_sqlite_pool_metrics::{MetricsCollector, MetricsConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!    let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default())?);
//!    let pool = ConnectionPool::with_observer("app.db", PoolConfig::default(), metrics.clone())?;
//!    pool.initialize().await?;
//!
//!    let mut alerts = metrics.subscribe();
//!    let _task = metrics.start();
//!
//!    while let Ok(event) = alerts.recv().await {
//!       println!("{event:?}");
//!    }
//!    Ok(())
//! }
//! ```

mod alert;
mod collector;
mod config;
mod error;
mod snapshot;
mod stream;

pub use alert::{Alert, AlertEvent, AlertKind, AlertState, AlertTransition};
pub use collector::{MetricsCollector, MetricsTask, SLOW_QUERY_THRESHOLD};
pub use config::{AlertThresholds, MetricsConfig};
pub use error::{Error, Result};
pub use snapshot::{MetricsSnapshot, PerformanceReport};
pub use stream::{AlertStream, AlertStreamEvent};
