/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the task board storage layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error from the connection pool.
   #[error(transparent)]
   Pool(#[from] sqlx_sqlite_pool::Error),

   /// Error from the metrics collector.
   #[error(transparent)]
   Metrics(#[from] sqlx_sqlite_pool_metrics::Error),

   /// Error from the migration lock.
   #[error(transparent)]
   Lock(#[from] sqlx_sqlite_migration_lock::Error),

   /// A migration statement failed; its transaction was rolled back and the
   /// ledger was left untouched.
   #[error("migration {version} ({name}) failed: {source}")]
   MigrationFailed {
      version: i64,
      name: String,
      #[source]
      source: sqlx_sqlite_pool::Error,
   },

   /// Two migrations share a version number.
   #[error("duplicate migration version {0}")]
   DuplicateMigration(i64),

   /// An environment variable held a value that could not be parsed.
   #[error("invalid value {value:?} for {var}: expected {expected}")]
   InvalidEnv {
      var: &'static str,
      value: String,
      expected: &'static str,
   },

   /// SQLite type that cannot be mapped to JSON.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),

   /// Multiple rows returned from fetch_one query.
   #[error("fetch_one() query returned {0} rows, expected 0 or 1")]
   MultipleRowsReturned(usize),

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      use sqlx_sqlite_migration_lock::Error as LockError;
      use sqlx_sqlite_pool::Error as PoolError;

      match self {
         Error::Sqlx(e) | Error::Pool(PoolError::Sqlx(e)) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::Pool(PoolError::AcquireTimeout { .. }) => "ACQUIRE_TIMEOUT".to_string(),
         Error::Pool(PoolError::PoolClosed) => "POOL_CLOSED".to_string(),
         Error::Pool(PoolError::ConnectionCreation(_)) => "CONNECTION_CREATION_FAILED".to_string(),
         Error::Pool(PoolError::InvalidStateTransition { .. }) => {
            "INVALID_STATE_TRANSITION".to_string()
         }
         Error::Pool(PoolError::InvalidConfig(_))
         | Error::Metrics(_)
         | Error::Lock(LockError::InvalidConfig(_))
         | Error::InvalidEnv { .. } => "INVALID_CONFIG".to_string(),
         Error::Lock(LockError::Io(_)) => "IO_ERROR".to_string(),
         Error::Lock(LockError::LockTimeout { .. }) => "LOCK_TIMEOUT".to_string(),
         Error::Lock(LockError::NotOwner { .. }) => "LOCK_OWNERSHIP_MISMATCH".to_string(),
         Error::Lock(LockError::Record(_)) => "LOCK_RECORD_INVALID".to_string(),
         Error::MigrationFailed { .. } => "MIGRATION_FAILED".to_string(),
         Error::DuplicateMigration(_) => "DUPLICATE_MIGRATION".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
         Error::MultipleRowsReturned(_) => "MULTIPLE_ROWS_RETURNED".to_string(),
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED".to_string(),
      }
   }

   /// True when a request handler should answer "service temporarily
   /// unavailable": the pool stayed saturated past the acquire timeout or
   /// is shutting down.
   pub fn is_unavailable(&self) -> bool {
      matches!(self, Error::Pool(e) if e.is_unavailable())
   }
}

#[cfg(test)]
mod tests {
   use std::path::PathBuf;
   use std::time::Duration;

   use super::*;

   #[test]
   fn test_error_code_acquire_timeout_is_unavailable() {
      let err = Error::from(sqlx_sqlite_pool::Error::AcquireTimeout {
         waited: Duration::from_secs(30),
      });
      assert_eq!(err.error_code(), "ACQUIRE_TIMEOUT");
      assert!(err.is_unavailable());
   }

   #[test]
   fn test_error_code_pool_closed_is_unavailable() {
      let err = Error::from(sqlx_sqlite_pool::Error::PoolClosed);
      assert_eq!(err.error_code(), "POOL_CLOSED");
      assert!(err.is_unavailable());
   }

   #[test]
   fn test_error_code_lock_timeout() {
      let err = Error::from(sqlx_sqlite_migration_lock::Error::LockTimeout {
         path: PathBuf::from("app.db.migration.lock"),
         waited: Duration::from_secs(30),
         holder: None,
      });
      assert_eq!(err.error_code(), "LOCK_TIMEOUT");
      assert!(!err.is_unavailable());
   }

   #[test]
   fn test_error_code_lock_ownership_mismatch() {
      let err = Error::from(sqlx_sqlite_migration_lock::Error::NotOwner {
         path: PathBuf::from("app.db.migration.lock"),
         holder: None,
      });
      assert_eq!(err.error_code(), "LOCK_OWNERSHIP_MISMATCH");
   }

   #[test]
   fn test_error_code_lock_io() {
      let err = Error::from(sqlx_sqlite_migration_lock::Error::Io(std::io::Error::from(
         std::io::ErrorKind::PermissionDenied,
      )));
      assert_eq!(err.error_code(), "IO_ERROR");
      assert!(!err.is_unavailable());
   }

   #[test]
   fn test_error_code_migration_failed() {
      let err = Error::MigrationFailed {
         version: 3,
         name: "add_labels".into(),
         source: sqlx_sqlite_pool::Error::Sqlx(sqlx::Error::RowNotFound),
      };
      assert_eq!(err.error_code(), "MIGRATION_FAILED");
      assert!(err.to_string().contains("migration 3 (add_labels)"));
   }

   #[test]
   fn test_error_code_invalid_env() {
      let err = Error::InvalidEnv {
         var: "TASKBOARD_DB_POOL_SIZE",
         value: "ten".into(),
         expected: "a non-negative integer",
      };
      assert_eq!(err.error_code(), "INVALID_CONFIG");
      assert!(err.to_string().contains("TASKBOARD_DB_POOL_SIZE"));
   }

   #[test]
   fn test_error_code_multiple_rows_returned() {
      let err = Error::MultipleRowsReturned(5);
      assert_eq!(err.error_code(), "MULTIPLE_ROWS_RETURNED");
      assert!(err.to_string().contains("5 rows"));
   }

   #[test]
   fn test_error_code_sqlx_non_database() {
      // RowNotFound is not a database error, so no SQLite code
      let err = Error::Sqlx(sqlx::Error::RowNotFound);
      assert_eq!(err.error_code(), "SQLX_ERROR");
   }
}
