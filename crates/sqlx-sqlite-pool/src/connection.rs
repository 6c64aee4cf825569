//! A single pooled SQLite handle

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use sqlx::query::Query;
use sqlx::sqlite::{
   SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteQueryResult, SqliteRow,
};
use sqlx::{ConnectOptions, Connection as _, Sqlite};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::state::{ConnectionState, StateMachine, StateTransition};
use crate::stats::PoolObserver;
use crate::{Error, Result};

/// A database connection owned by a [`ConnectionPool`](crate::ConnectionPool).
///
/// Callers borrow it through a [`PooledConnection`](crate::PooledConnection)
/// and run statements with [`run`](Self::run), [`get`](Self::get) and
/// [`all`](Self::all). Every statement bumps the usage counters and is
/// reported to the pool's observer, if one is attached.
///
/// The lifecycle state can only be changed by the pool.
pub struct Connection {
   id: Uuid,
   created_at: Instant,
   last_used_at: Instant,
   query_count: u64,
   machine: StateMachine,
   in_transaction: bool,
   raw: SqliteConnection,
   observer: Option<Arc<dyn PoolObserver>>,
}

impl Connection {
   /// Open a new handle. The connection starts in `CREATING`.
   pub(crate) async fn open(
      options: &SqliteConnectOptions,
      observer: Option<Arc<dyn PoolObserver>>,
   ) -> Result<Self> {
      let raw = options.connect().await.map_err(Error::ConnectionCreation)?;
      let now = Instant::now();
      let conn = Self {
         id: Uuid::new_v4(),
         created_at: now,
         last_used_at: now,
         query_count: 0,
         machine: StateMachine::new(),
         in_transaction: false,
         raw,
         observer,
      };
      debug!(connection = %conn.id, "Opened database connection");
      Ok(conn)
   }

   pub fn id(&self) -> Uuid {
      self.id
   }

   pub fn created_at(&self) -> Instant {
      self.created_at
   }

   pub fn last_used_at(&self) -> Instant {
      self.last_used_at
   }

   /// Statements run through this connection since it was opened.
   pub fn query_count(&self) -> u64 {
      self.query_count
   }

   pub fn state(&self) -> ConnectionState {
      self.machine.state()
   }

   /// Recent lifecycle transitions, oldest first.
   pub fn history(&self) -> Vec<StateTransition> {
      self.machine.history().copied().collect()
   }

   /// True between [`begin`](Self::begin) and a successful
   /// [`commit`](Self::commit) or [`rollback`](Self::rollback).
   ///
   /// The pool destroys connections released in this state instead of
   /// reusing them.
   pub fn in_transaction(&self) -> bool {
      self.in_transaction
   }

   /// Execute a statement, returning rows affected and the last insert id.
   pub async fn run<'q>(
      &mut self,
      query: Query<'q, Sqlite, SqliteArguments<'q>>,
   ) -> Result<SqliteQueryResult> {
      let started = Instant::now();
      let result = query.execute(&mut self.raw).await;
      self.finish_query(started, result.is_ok());
      Ok(result?)
   }

   /// Fetch zero or one row.
   pub async fn get<'q>(
      &mut self,
      query: Query<'q, Sqlite, SqliteArguments<'q>>,
   ) -> Result<Option<SqliteRow>> {
      let started = Instant::now();
      let result = query.fetch_optional(&mut self.raw).await;
      self.finish_query(started, result.is_ok());
      Ok(result?)
   }

   /// Fetch every row.
   pub async fn all<'q>(
      &mut self,
      query: Query<'q, Sqlite, SqliteArguments<'q>>,
   ) -> Result<Vec<SqliteRow>> {
      let started = Instant::now();
      let result = query.fetch_all(&mut self.raw).await;
      self.finish_query(started, result.is_ok());
      Ok(result?)
   }

   /// Execute a script of one or more statements without bind parameters.
   pub async fn execute_batch(&mut self, sql: &str) -> Result<()> {
      let started = Instant::now();
      let result = sqlx::raw_sql(sql).execute(&mut self.raw).await;
      self.finish_query(started, result.is_ok());
      result?;
      Ok(())
   }

   /// Start an immediate (write-locking) transaction.
   pub async fn begin(&mut self) -> Result<()> {
      self.run(sqlx::query("BEGIN IMMEDIATE")).await?;
      self.in_transaction = true;
      Ok(())
   }

   pub async fn commit(&mut self) -> Result<()> {
      self.run(sqlx::query("COMMIT")).await?;
      self.in_transaction = false;
      Ok(())
   }

   pub async fn rollback(&mut self) -> Result<()> {
      self.run(sqlx::query("ROLLBACK")).await?;
      self.in_transaction = false;
      Ok(())
   }

   fn finish_query(&mut self, started: Instant, success: bool) {
      let elapsed = started.elapsed();
      self.query_count += 1;
      self.last_used_at = Instant::now();
      if let Some(observer) = &self.observer {
         observer.on_query(elapsed, success);
      }
   }

   /// Move to `next` through the state machine.
   ///
   /// Rejected transitions are logged and reported as `false`; they never
   /// escape the pool.
   pub(crate) fn advance(&mut self, next: ConnectionState) -> bool {
      match self.machine.transition(next) {
         Ok(()) => {
            trace!(connection = %self.id, state = %next, "Connection state changed");
            true
         }
         Err(e) => {
            error!(connection = %self.id, error = %e, "Rejected connection state change");
            false
         }
      }
   }

   pub(crate) fn touch(&mut self) {
      self.last_used_at = Instant::now();
   }

   /// Finish destruction and close the SQLite handle.
   pub(crate) async fn close(mut self) {
      self.advance(ConnectionState::Destroyed);
      let id = self.id;
      if let Err(e) = self.raw.close().await {
         debug!(connection = %id, error = %e, "Error while closing connection");
      }
   }
}

impl fmt::Debug for Connection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Connection")
         .field("id", &self.id)
         .field("state", &self.machine.state())
         .field("query_count", &self.query_count)
         .field("in_transaction", &self.in_transaction)
         .finish_non_exhaustive()
   }
}
