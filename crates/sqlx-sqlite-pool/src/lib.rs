//! # sqlx-sqlite-pool
//!
//! A bounded pool of SQLite connections built on SQLx, for applications where
//! many request handlers share one file-backed database.
//!
//! ## Core Types
//!
//! - **[`ConnectionPool`]**: Bounded pool with FIFO queueing, acquire timeouts and idle reclamation
//! - **[`PooledConnection`]**: RAII guard returning its connection to the pool on drop
//! - **[`Connection`]**: A pooled handle exposing `run`, `get` and `all`
//! - **[`ConnectionState`]** / **[`StateMachine`]**: Explicit connection lifecycle with transition history
//! - **[`PoolStats`]** / **[`PoolObserver`]**: Bookkeeping snapshot and the hook metrics layers attach to
//! - **[`PoolConfig`]**: Pool size, timeouts and resident connection count
//! - **[`Error`]**: Error type for pool operations
//!
//! ## Architecture
//!
//! - **Bounded**: never more than `pool_size` connections, busy or idle
//! - **Lazy growth**: `min_connections` are opened up front, the rest on demand
//! - **Fair waiting**: saturated acquirers queue in arrival order and a released connection goes
//!   straight to the oldest one
//! - **Idle reclamation**: a background sweep closes connections idle past `idle_timeout`
//!
//! SQLite serializes writes itself (WAL mode); the pool bounds handles, not statements.

mod config;
mod connection;
mod error;
mod pool;
mod state;
mod stats;

// Re-export public types
pub use config::PoolConfig;
pub use connection::Connection;
pub use error::{Error, Result};
pub use pool::{ConnectionPool, PooledConnection};
pub use state::{ConnectionState, StateMachine, StateTransition};
pub use stats::{PoolObserver, PoolStats};
