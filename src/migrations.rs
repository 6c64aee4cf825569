//! Versioned schema migrations recorded in a `_migrations` ledger table.

use std::collections::BTreeSet;

use sqlx::Row;
use sqlx_sqlite_pool::ConnectionPool;
use tracing::{debug, info};

use crate::{Error, Result};

const CREATE_LEDGER: &str = "\
CREATE TABLE IF NOT EXISTS _migrations (
   version INTEGER PRIMARY KEY,
   name TEXT NOT NULL,
   applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)";

/// One schema change, usually embedded with `include_str!`.
///
/// `sql` may hold several statements but must not manage its own
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
   pub version: i64,
   pub name: &'static str,
   pub sql: &'static str,
}

impl Migration {
   pub const fn new(version: i64, name: &'static str, sql: &'static str) -> Self {
      Self { version, name, sql }
   }
}

/// A ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
   pub version: i64,
   pub name: String,
   pub applied_at: String,
}

/// Applies pending migrations in version order.
///
/// Callers running more than one process against the same database should
/// hold a [`MigrationLock`](sqlx_sqlite_migration_lock::MigrationLock)
/// around [`Migrator::run`]; [`Store::open`](crate::Store::open) does.
pub struct Migrator;

impl Migrator {
   /// Apply every migration whose version is not yet in the ledger, lowest
   /// version first. Returns the versions applied by this call.
   ///
   /// Each migration and its ledger row commit together. The first failure
   /// rolls that migration back and stops with [`Error::MigrationFailed`];
   /// migrations applied before it stay applied.
   pub async fn run(pool: &ConnectionPool, migrations: &[Migration]) -> Result<Vec<i64>> {
      let ordered = Self::ordered(migrations)?;

      let mut conn = pool.acquire().await?;
      conn.execute_batch(CREATE_LEDGER).await?;
      let applied: BTreeSet<i64> = conn
         .all(sqlx::query("SELECT version FROM _migrations"))
         .await?
         .iter()
         .map(|row| row.try_get::<i64, _>(0))
         .collect::<std::result::Result<_, sqlx::Error>>()?;
      conn.release();

      let mut newly_applied = Vec::new();
      for migration in ordered {
         if applied.contains(&migration.version) {
            debug!(version = migration.version, "Migration already applied");
            continue;
         }

         let Migration { version, name, sql } = *migration;
         pool
            .transaction(async |conn| {
               conn.execute_batch(sql).await?;
               conn
                  .run(
                     sqlx::query("INSERT INTO _migrations (version, name) VALUES ($1, $2)")
                        .bind(version)
                        .bind(name),
                  )
                  .await?;
               Ok::<_, sqlx_sqlite_pool::Error>(())
            })
            .await
            .map_err(|source| Error::MigrationFailed {
               version,
               name: name.to_string(),
               source,
            })?;

         info!(version, name, "Applied migration");
         newly_applied.push(version);
      }

      Ok(newly_applied)
   }

   /// Ledger contents, oldest version first. Empty if no migration has ever
   /// run.
   pub async fn applied(pool: &ConnectionPool) -> Result<Vec<AppliedMigration>> {
      let mut conn = pool.acquire().await?;
      conn.execute_batch(CREATE_LEDGER).await?;
      let rows = conn
         .all(sqlx::query(
            "SELECT version, name, applied_at FROM _migrations ORDER BY version",
         ))
         .await?;

      rows
         .iter()
         .map(|row| -> Result<AppliedMigration> {
            Ok(AppliedMigration {
               version: row.try_get("version")?,
               name: row.try_get("name")?,
               applied_at: row.try_get("applied_at")?,
            })
         })
         .collect()
   }

   fn ordered(migrations: &[Migration]) -> Result<Vec<&Migration>> {
      let mut ordered: Vec<&Migration> = migrations.iter().collect();
      ordered.sort_by_key(|m| m.version);
      if let Some(pair) = ordered.windows(2).find(|w| w[0].version == w[1].version) {
         return Err(Error::DuplicateMigration(pair[0].version));
      }
      Ok(ordered)
   }
}
