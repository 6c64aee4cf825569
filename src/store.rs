use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::Sqlite;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx_sqlite_migration_lock::MigrationLock;
use sqlx_sqlite_pool::{Connection, ConnectionPool, PoolStats};
use sqlx_sqlite_pool_metrics::{
   AlertEvent, AlertKind, AlertStream, MetricsCollector, MetricsTask, PerformanceReport,
};
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use crate::config::StoreConfig;
use crate::decode::{decode_rows, row_to_json};
use crate::migrations::{Migration, Migrator};
use crate::{Error, Result};

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteQueryResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: u64,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only set for INSERT operations on tables with a ROWID.
   /// Tables created with `WITHOUT ROWID` will not set this value (returns 0).
   pub last_insert_id: i64,
}

/// The task board's database: a bounded connection pool with health
/// metrics attached, opened only after pending migrations have run under
/// the cross-process migration lock.
///
/// Share it between request handlers behind an `Arc`.
pub struct Store {
   path: PathBuf,
   pool: ConnectionPool,
   metrics: Arc<MetricsCollector>,
   metrics_task: Mutex<Option<MetricsTask>>,
}

impl Store {
   /// Open the database at `path`, migrate it and start metrics collection.
   ///
   /// Migrations run while holding the migration lock, so concurrently
   /// starting processes apply each one exactly once. Any failure is
   /// returned and leaves no pool running.
   pub async fn open(
      path: impl AsRef<Path>,
      config: StoreConfig,
      migrations: &[Migration],
   ) -> Result<Self> {
      config.validate()?;
      let path = path.as_ref().to_path_buf();

      let metrics = Arc::new(MetricsCollector::new(config.metrics.clone())?);
      let pool = ConnectionPool::with_observer(&path, config.pool.clone(), metrics.clone())?;

      if let Err(e) = Self::prepare(&pool, &path, &config, migrations).await {
         pool.destroy().await;
         return Err(e);
      }

      let task = metrics.start();
      info!(path = %path.display(), "Store opened");

      Ok(Self {
         path,
         pool,
         metrics,
         metrics_task: Mutex::new(Some(task)),
      })
   }

   async fn prepare(
      pool: &ConnectionPool,
      path: &Path,
      config: &StoreConfig,
      migrations: &[Migration],
   ) -> Result<()> {
      pool.initialize().await?;

      let mut lock = MigrationLock::new(path, config.lock.clone())?;
      let applied = lock
         .with_lock(async || Migrator::run(pool, migrations).await)
         .await?;

      if !applied.is_empty() {
         info!(path = %path.display(), ?applied, "Database migrated");
      }
      Ok(())
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn pool(&self) -> &ConnectionPool {
      &self.pool
   }

   pub fn metrics(&self) -> &Arc<MetricsCollector> {
      &self.metrics
   }

   /// Execute a write query (INSERT/UPDATE/DELETE)
   pub async fn execute(&self, query: &str, values: Vec<JsonValue>) -> Result<WriteQueryResult> {
      let mut conn = self.pool.acquire().await?;
      let result = conn.run(bind_values(sqlx::query(query), values)).await?;

      Ok(WriteQueryResult {
         rows_affected: result.rows_affected(),
         last_insert_id: result.last_insert_rowid(),
      })
   }

   /// Execute multiple write statements atomically within a transaction.
   ///
   /// This method:
   /// 1. Begins a transaction (BEGIN IMMEDIATE)
   /// 2. Executes all statements in order
   /// 3. Commits on success (COMMIT)
   /// 4. Rolls back on any error (ROLLBACK)
   ///
   /// The connection is held for the entire transaction. Returns the result
   /// of each statement execution.
   pub async fn execute_transaction(
      &self,
      statements: Vec<(String, Vec<JsonValue>)>,
   ) -> Result<Vec<WriteQueryResult>> {
      let mut conn = self.pool.acquire().await?;
      conn.begin().await?;

      // Execute all statements, collecting results and rolling back on error
      let result = async {
         let mut results = Vec::with_capacity(statements.len());
         for (query, values) in &statements {
            let exec_result = conn
               .run(bind_values(sqlx::query(query), values.clone()))
               .await?;
            results.push(WriteQueryResult {
               rows_affected: exec_result.rows_affected(),
               last_insert_id: exec_result.last_insert_rowid(),
            });
         }
         Ok::<Vec<WriteQueryResult>, Error>(results)
      }
      .await;

      match result {
         Ok(results) => {
            conn.commit().await?;
            Ok(results)
         }
         Err(e) => match conn.rollback().await {
            // Rollback succeeded, return original error
            Ok(()) => Err(e),

            // Rollback also failed; the pool discards the connection on release
            Err(rollback_err) => Err(Error::TransactionRollbackFailed {
               transaction_error: e.to_string(),
               rollback_error: rollback_err.to_string(),
            }),
         },
      }
   }

   /// Execute a SELECT query, possibly returning multiple rows
   pub async fn fetch_all(
      &self,
      query: &str,
      values: Vec<JsonValue>,
   ) -> Result<Vec<IndexMap<String, JsonValue>>> {
      let mut conn = self.pool.acquire().await?;
      let rows = conn.all(bind_values(sqlx::query(query), values)).await?;
      decode_rows(&rows)
   }

   /// Execute a SELECT query expecting zero or one result
   pub async fn fetch_one(
      &self,
      query: &str,
      values: Vec<JsonValue>,
   ) -> Result<Option<IndexMap<String, JsonValue>>> {
      // Fetching up to 2 rows is enough to know if there's more than 1
      let limited_query = format!("{} LIMIT 2", query.trim_end().trim_end_matches(';'));

      let mut conn = self.pool.acquire().await?;
      let rows = conn
         .all(bind_values(sqlx::query(&limited_query), values))
         .await?;

      match rows.as_slice() {
         [] => Ok(None),
         [row] => Ok(Some(row_to_json(row)?)),
         _ => Err(Error::MultipleRowsReturned(rows.len())),
      }
   }

   /// Run `f` with a pooled connection, released on every exit path.
   pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
   where
      F: AsyncFnOnce(&mut Connection) -> Result<T>,
   {
      self.pool.with_connection(f).await
   }

   /// Run `f` inside `BEGIN IMMEDIATE` / `COMMIT`, rolling back on error.
   pub async fn transaction<T, F>(&self, f: F) -> Result<T>
   where
      F: AsyncFnOnce(&mut Connection) -> Result<T>,
   {
      self.pool.transaction(f).await
   }

   pub fn stats(&self) -> PoolStats {
      self.pool.stats()
   }

   pub fn performance_report(&self) -> PerformanceReport {
      self.metrics.performance_report()
   }

   pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
      self.metrics.subscribe()
   }

   /// Alert events as a `Stream`, limited to `kinds` unless empty.
   pub fn alert_stream<I>(&self, kinds: I) -> AlertStream
   where
      I: IntoIterator<Item = AlertKind>,
   {
      self.metrics.subscribe_stream(kinds)
   }

   /// Stop metrics collection and shut the pool down.
   ///
   /// Queued acquirers fail and connections still in use are closed when
   /// released. Safe to call more than once.
   pub async fn close(&self) {
      if let Some(task) = self.metrics_task.lock().await.take() {
         task.stop();
      }
      self.pool.destroy().await;
      info!(path = %self.path.display(), "Store closed");
   }
}

impl Drop for Store {
   fn drop(&mut self) {
      if !self.pool.is_closed() {
         warn!(path = %self.path.display(), "Store dropped without close()");
      }
   }
}

fn bind_values<'a>(
   mut query: Query<'a, Sqlite, SqliteArguments<'a>>,
   values: Vec<JsonValue>,
) -> Query<'a, Sqlite, SqliteArguments<'a>> {
   for value in values {
      query = bind_value(query, value);
   }
   query
}

/// Helper function to bind a JSON value to a SQLx query
fn bind_value<'a>(
   query: Query<'a, Sqlite, SqliteArguments<'a>>,
   value: JsonValue,
) -> Query<'a, Sqlite, SqliteArguments<'a>> {
   match value {
      JsonValue::Null => query.bind(None::<JsonValue>),
      JsonValue::Bool(b) => query.bind(b),
      JsonValue::String(s) => query.bind(s),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Value too large for i64, use f64 (will lose precision)
            query.bind(uint_val as f64)
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      // Arrays and objects are stored as JSON text
      other => query.bind(other),
   }
}
