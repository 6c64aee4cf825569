//! Error types for the sqlx-sqlite-pool-metrics crate.

/// Errors that can occur when configuring metrics collection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Collector configuration failed validation.
   #[error("Invalid metrics configuration: {0}")]
   InvalidConfig(String),
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
