//! Error types for sqlx-sqlite-pool

use std::time::Duration;

use thiserror::Error;

use crate::state::ConnectionState;

/// Errors that may occur when working with sqlx-sqlite-pool
#[derive(Error, Debug)]
pub enum Error {
   /// Error from the sqlx library while running a query on a pooled connection
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Every connection stayed busy for the whole acquire timeout
   #[error("Timed out after {waited:?} waiting for a database connection")]
   AcquireTimeout { waited: Duration },

   /// The underlying SQLite handle could not be opened
   #[error("Failed to open database connection: {0}")]
   ConnectionCreation(#[source] sqlx::Error),

   /// Pool has been destroyed and cannot hand out connections
   #[error("Connection pool has been shut down")]
   PoolClosed,

   /// A connection lifecycle change that the transition table forbids.
   ///
   /// The pool logs and recovers from this locally; it is only returned by
   /// the state machine itself.
   #[error("Invalid connection state transition: {from} -> {to}")]
   InvalidStateTransition {
      from: ConnectionState,
      to: ConnectionState,
   },

   /// Pool configuration failed validation
   #[error("Invalid pool configuration: {0}")]
   InvalidConfig(String),
}

impl Error {
   /// True for failures a request handler should surface as "service
   /// temporarily unavailable" rather than as an internal error.
   pub fn is_unavailable(&self) -> bool {
      matches!(self, Error::AcquireTimeout { .. } | Error::PoolClosed)
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_unavailable_errors() {
      let timeout = Error::AcquireTimeout {
         waited: Duration::from_millis(100),
      };
      assert!(timeout.is_unavailable());
      assert!(timeout.to_string().contains("100ms"));
      assert!(Error::PoolClosed.is_unavailable());
      assert!(!Error::InvalidConfig("pool_size".into()).is_unavailable());
   }

   #[test]
   fn test_invalid_transition_message() {
      let err = Error::InvalidStateTransition {
         from: ConnectionState::Destroyed,
         to: ConnectionState::Busy,
      };
      assert_eq!(
         err.to_string(),
         "Invalid connection state transition: DESTROYED -> BUSY"
      );
   }
}
