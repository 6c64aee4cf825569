//! Bounded connection pool with FIFO hand-off and idle reclamation

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::state::ConnectionState;
use crate::stats::{PoolObserver, PoolStats};
use crate::{Error, Result};

/// Bounded pool of SQLite connections.
///
/// ## Acquisition
///
/// `acquire()` hands out an idle connection if there is one, otherwise opens a
/// new one while the pool is below `pool_size`, otherwise queues the caller
/// for at most `acquire_timeout`. Queued callers are served strictly in
/// arrival order: a released connection goes straight to the oldest waiter
/// (`RELEASING -> BUSY`) and only reaches the idle set when nobody is queued.
///
/// ## Lifecycle
///
/// ```text
/// 1. ConnectionPool::open (or new + initialize) opens min_connections eagerly
/// 2. acquire() / with_connection() / transaction() from many tasks
/// 3. Background sweep closes connections idle longer than idle_timeout
/// 4. destroy() rejects waiters and closes everything
/// ```
///
/// The handle is cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
   shared: Arc<PoolShared>,
}

struct PoolShared {
   path: PathBuf,
   options: SqliteConnectOptions,
   config: PoolConfig,
   observer: Option<Arc<dyn PoolObserver>>,
   state: Mutex<PoolState>,
   /// Serializes `initialize()`; holds whether it has completed
   initialized: AsyncMutex<bool>,
   reaper: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct PoolState {
   /// Least recently used at the front
   idle: VecDeque<Connection>,
   busy: HashSet<Uuid>,
   waiters: VecDeque<Waiter>,
   /// Connections being opened, counted against `pool_size`
   opening: usize,
   /// Subset of `opening` started on behalf of queued waiters
   replenishing: usize,
   next_waiter_id: u64,
   closed: bool,
   created: u64,
   destroyed: u64,
   max_busy: usize,
   acquisitions: u64,
   releases: u64,
   timeouts: u64,
   errors: u64,
}

struct Waiter {
   id: u64,
   enqueued_at: Instant,
   tx: oneshot::Sender<Result<Connection>>,
}

impl PoolState {
   fn total(&self) -> usize {
      self.idle.len() + self.busy.len() + self.opening
   }

   fn mark_busy(&mut self, conn: &Connection) {
      self.busy.insert(conn.id());
      self.max_busy = self.max_busy.max(self.busy.len());
   }

   /// Remove a queued waiter. Returns false if it was already served.
   fn remove_waiter(&mut self, id: u64) -> bool {
      match self.waiters.iter().position(|w| w.id == id) {
         Some(index) => {
            self.waiters.remove(index);
            true
         }
         None => false,
      }
   }

   fn stats(&self, max_size: usize) -> PoolStats {
      PoolStats {
         max_size,
         total: self.total(),
         busy: self.busy.len(),
         idle: self.idle.len(),
         pending: self.waiters.len(),
         created: self.created,
         destroyed: self.destroyed,
         max_busy: self.max_busy,
         acquisitions: self.acquisitions,
         releases: self.releases,
         timeouts: self.timeouts,
         errors: self.errors,
      }
   }
}

impl ConnectionPool {
   /// Create a pool for the database at `path` without opening any
   /// connections. Call [`initialize`](Self::initialize) to open the
   /// resident connections and start the idle sweep.
   pub fn new(path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
      Self::build(path.as_ref(), config, None)
   }

   /// Like [`new`](Self::new), reporting query timings, acquisition timings
   /// and stats to `observer`.
   pub fn with_observer(
      path: impl AsRef<Path>,
      config: PoolConfig,
      observer: Arc<dyn PoolObserver>,
   ) -> Result<Self> {
      Self::build(path.as_ref(), config, Some(observer))
   }

   /// Create and initialize a pool.
   pub async fn open(path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
      let pool = Self::new(path, config)?;
      pool.initialize().await?;
      Ok(pool)
   }

   fn build(
      path: &Path,
      config: PoolConfig,
      observer: Option<Arc<dyn PoolObserver>>,
   ) -> Result<Self> {
      config.validate()?;

      let options = SqliteConnectOptions::new()
         .filename(path)
         .create_if_missing(true)
         .journal_mode(SqliteJournalMode::Wal)
         .busy_timeout(config.busy_timeout);

      Ok(Self {
         shared: Arc::new(PoolShared {
            path: path.to_path_buf(),
            options,
            config,
            observer,
            state: Mutex::new(PoolState::default()),
            initialized: AsyncMutex::new(false),
            reaper: Mutex::new(None),
         }),
      })
   }

   /// Open `min_connections` connections and start the idle sweep.
   ///
   /// Calling this more than once is a no-op.
   pub async fn initialize(&self) -> Result<()> {
      let mut initialized = self.shared.initialized.lock().await;
      if *initialized {
         return Ok(());
      }

      for _ in 0..self.shared.config.min_connections {
         if !self.shared.open_idle().await? {
            break;
         }
      }

      let reaper = spawn_reaper(&self.shared);
      *self.shared.reaper.lock() = Some(reaper);
      *initialized = true;

      info!(
         path = %self.shared.path.display(),
         pool_size = self.shared.config.pool_size,
         resident = self.shared.config.min_connections,
         "Connection pool initialized"
      );
      self.shared.publish_stats();
      Ok(())
   }

   /// Borrow a connection, waiting up to `acquire_timeout` if every
   /// connection is busy.
   ///
   /// The returned guard gives the connection back when dropped. Dropping
   /// this future while it is queued withdraws only this request.
   pub async fn acquire(&self) -> Result<PooledConnection> {
      let started = Instant::now();
      let conn = self.shared.checkout().await?;

      if let Some(observer) = &self.shared.observer {
         observer.on_acquire(started.elapsed());
      }

      Ok(PooledConnection {
         conn: Some(conn),
         pool: Arc::clone(&self.shared),
      })
   }

   /// Return a connection previously taken out with
   /// [`PooledConnection::detach`].
   ///
   /// A connection this pool does not have checked out (already released,
   /// or from another pool) is logged and handed back untouched.
   pub fn release(&self, conn: Connection) -> std::result::Result<(), Connection> {
      self.shared.check_in(conn)
   }

   /// Run `f` with a borrowed connection, releasing it on every exit path.
   pub async fn with_connection<T, E, F>(&self, f: F) -> std::result::Result<T, E>
   where
      F: AsyncFnOnce(&mut Connection) -> std::result::Result<T, E>,
      E: From<Error>,
   {
      let mut conn = self.acquire().await?;
      f(&mut *conn).await
   }

   /// Run `f` inside `BEGIN IMMEDIATE` / `COMMIT`, rolling back if it fails.
   ///
   /// If the rollback itself fails, the connection is destroyed on release
   /// rather than reused with a dangling transaction.
   pub async fn transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
   where
      F: AsyncFnOnce(&mut Connection) -> std::result::Result<T, E>,
      E: From<Error>,
   {
      let mut conn = self.acquire().await?;
      conn.begin().await?;

      match f(&mut *conn).await {
         Ok(value) => {
            conn.commit().await?;
            Ok(value)
         }
         Err(err) => {
            if let Err(rollback_err) = conn.rollback().await {
               warn!(
                  connection = %conn.id(),
                  error = %rollback_err,
                  "Rollback failed; connection will be discarded"
               );
            }
            Err(err)
         }
      }
   }

   /// Close idle connections unused for `idle_timeout`, never going below
   /// `min_connections`. Returns how many were closed.
   ///
   /// The background sweep calls this every `reap_interval`.
   pub async fn reap_idle(&self) -> usize {
      self.shared.reap_idle().await
   }

   /// Shut the pool down.
   ///
   /// Queued acquirers fail with [`Error::PoolClosed`], idle connections are
   /// closed, and connections still checked out are destroyed as soon as they
   /// are released. Safe to call more than once.
   pub async fn destroy(&self) {
      let (waiters, idle, outstanding) = {
         let mut state = self.shared.state.lock();
         if state.closed {
            return;
         }
         state.closed = true;

         let waiters: Vec<Waiter> = state.waiters.drain(..).collect();
         let mut idle: Vec<Connection> = state.idle.drain(..).collect();
         for conn in &mut idle {
            conn.advance(ConnectionState::Destroying);
         }
         state.destroyed += idle.len() as u64;
         (waiters, idle, state.busy.len())
      };

      if let Some(reaper) = self.shared.reaper.lock().take() {
         reaper.abort();
      }

      for waiter in waiters {
         let _ = waiter.tx.send(Err(Error::PoolClosed));
      }

      let closed = idle.len();
      for conn in idle {
         conn.close().await;
      }

      info!(
         path = %self.shared.path.display(),
         closed,
         outstanding,
         "Connection pool destroyed"
      );
      self.shared.publish_stats();
   }

   pub fn stats(&self) -> PoolStats {
      self.shared.stats()
   }

   pub fn config(&self) -> &PoolConfig {
      &self.shared.config
   }

   pub fn path(&self) -> &Path {
      &self.shared.path
   }

   pub fn is_closed(&self) -> bool {
      self.shared.state.lock().closed
   }
}

impl fmt::Debug for ConnectionPool {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ConnectionPool")
         .field("path", &self.shared.path)
         .field("stats", &self.stats())
         .finish()
   }
}

impl PoolShared {
   fn stats(&self) -> PoolStats {
      self.state.lock().stats(self.config.pool_size)
   }

   fn publish_stats(&self) {
      if let Some(observer) = &self.observer {
         observer.on_stats(&self.stats());
      }
   }

   /// Open one connection straight into the idle set. Returns false when the
   /// pool is already at capacity.
   async fn open_idle(&self) -> Result<bool> {
      {
         let mut state = self.state.lock();
         if state.closed {
            return Err(Error::PoolClosed);
         }
         if state.total() >= self.config.pool_size {
            return Ok(false);
         }
         state.opening += 1;
      }

      let opened = Connection::open(&self.options, self.observer.clone()).await;

      let mut state = self.state.lock();
      state.opening -= 1;
      let mut conn = opened?;
      state.created += 1;
      if state.closed {
         state.destroyed += 1;
         conn.advance(ConnectionState::Destroyed);
         return Err(Error::PoolClosed);
      }
      conn.advance(ConnectionState::Available);
      state.idle.push_back(conn);
      Ok(true)
   }

   async fn checkout(self: &Arc<Self>) -> Result<Connection> {
      let queued = {
         let mut state = self.state.lock();
         if state.closed {
            return Err(Error::PoolClosed);
         }

         if state.waiters.is_empty() {
            while let Some(mut conn) = state.idle.pop_back() {
               if conn.advance(ConnectionState::Busy) {
                  conn.touch();
                  state.mark_busy(&conn);
                  state.acquisitions += 1;
                  drop(state);
                  self.publish_stats();
                  return Ok(conn);
               }
               state.destroyed += 1;
            }
         }

         if state.waiters.is_empty() && state.total() < self.config.pool_size {
            state.opening += 1;
            None
         } else {
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter {
               id,
               enqueued_at: Instant::now(),
               tx,
            });
            self.fill_waiters(&mut state);
            trace!(waiter = id, pending = state.waiters.len(), "Queued acquire");
            Some(QueuedAcquire {
               shared: Arc::clone(self),
               id,
               rx,
               settled: false,
            })
         }
      };

      match queued {
         None => self.open_for_checkout().await,
         Some(queued) => {
            self.publish_stats();
            queued.wait(self.config.acquire_timeout).await
         }
      }
   }

   /// Open a connection for the current caller; a slot in `opening` has
   /// already been reserved.
   async fn open_for_checkout(self: &Arc<Self>) -> Result<Connection> {
      let mut reservation = Reservation {
         shared: Arc::clone(self),
         armed: true,
      };
      let opened = Connection::open(&self.options, self.observer.clone()).await;

      // The guard is scoped so it is not held in the future across the
      // `close().await` below (keeps the future `Send`).
      let closed_conn = {
         let mut state = self.state.lock();
         state.opening -= 1;
         reservation.armed = false;

         let mut conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
               state.errors += 1;
               self.fill_waiters(&mut state);
               drop(state);
               warn!(error = %e, "Failed to open connection for acquire");
               self.publish_stats();
               return Err(e);
            }
         };

         state.created += 1;
         if state.closed {
            state.destroyed += 1;
            drop(state);
            conn
         } else {
            conn.advance(ConnectionState::Available);
            conn.advance(ConnectionState::Busy);
            state.mark_busy(&conn);
            state.acquisitions += 1;
            drop(state);
            self.publish_stats();
            return Ok(conn);
         }
      };

      closed_conn.close().await;
      Err(Error::PoolClosed)
   }

   /// Start opening connections for queued waiters while there is spare
   /// capacity (capacity freed by a destroyed or failed connection).
   fn fill_waiters(self: &Arc<Self>, state: &mut PoolState) {
      if state.closed {
         return;
      }
      let Ok(runtime) = Handle::try_current() else {
         return;
      };

      while state.waiters.len() > state.replenishing && state.total() < self.config.pool_size {
         state.opening += 1;
         state.replenishing += 1;
         let shared = Arc::clone(self);
         runtime.spawn(async move { shared.replenish().await });
      }
   }

   async fn replenish(self: Arc<Self>) {
      let opened = Connection::open(&self.options, self.observer.clone()).await;

      let mut state = self.state.lock();
      state.opening -= 1;
      state.replenishing -= 1;

      match opened {
         Ok(mut conn) => {
            state.created += 1;
            if state.closed {
               state.destroyed += 1;
               conn.advance(ConnectionState::Destroyed);
               return;
            }
            conn.advance(ConnectionState::Available);
            self.dispatch(state, conn);
         }
         Err(e) => {
            state.errors += 1;
            if let Some(waiter) = state.waiters.pop_front() {
               let _ = waiter.tx.send(Err(e));
            }
            drop(state);
            self.publish_stats();
         }
      }
   }

   /// Give a connection in `RELEASING` or `AVAILABLE` to the oldest waiter,
   /// or park it in the idle set when nobody is waiting.
   fn dispatch(self: &Arc<Self>, mut state: MutexGuard<'_, PoolState>, mut conn: Connection) {
      while let Some(waiter) = state.waiters.pop_front() {
         conn.advance(ConnectionState::Busy);
         state.mark_busy(&conn);

         match waiter.tx.send(Ok(conn)) {
            Err(Ok(returned)) => {
               // Acquirer went away between queueing and hand-off
               state.busy.remove(&returned.id());
               conn = returned;
               conn.advance(ConnectionState::Releasing);
            }
            _ => {
               state.acquisitions += 1;
               trace!(
                  waiter = waiter.id,
                  waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                  "Handed connection to queued acquire"
               );
               drop(state);
               self.publish_stats();
               return;
            }
         }
      }

      // Freshly opened connections arrive already AVAILABLE
      if conn.state() == ConnectionState::Releasing {
         conn.advance(ConnectionState::Available);
      }
      state.idle.push_back(conn);
      drop(state);
      self.publish_stats();
   }

   fn check_in(self: &Arc<Self>, mut conn: Connection) -> std::result::Result<(), Connection> {
      let mut state = self.state.lock();
      if !state.busy.remove(&conn.id()) {
         drop(state);
         warn!(
            connection = %conn.id(),
            state = %conn.state(),
            "Ignoring release of a connection this pool has not checked out"
         );
         return Err(conn);
      }

      state.releases += 1;
      let releasing = conn.advance(ConnectionState::Releasing);
      conn.touch();

      if state.closed || conn.in_transaction() || !releasing {
         if conn.in_transaction() {
            warn!(connection = %conn.id(), "Discarding connection released inside a transaction");
         }
         conn.advance(ConnectionState::Destroying);
         conn.advance(ConnectionState::Destroyed);
         state.destroyed += 1;
         self.fill_waiters(&mut state);
         drop(state);
         self.publish_stats();
         return Ok(());
      }

      self.dispatch(state, conn);
      Ok(())
   }

   async fn reap_idle(&self) -> usize {
      let reclaimed = {
         let mut state = self.state.lock();
         let mut remaining = state.total();
         let mut kept = VecDeque::with_capacity(state.idle.len());
         let mut reclaimed = Vec::new();

         while let Some(mut conn) = state.idle.pop_front() {
            let expired = conn.last_used_at().elapsed() >= self.config.idle_timeout;
            if expired
               && remaining > self.config.min_connections
               && conn.advance(ConnectionState::Destroying)
            {
               remaining -= 1;
               reclaimed.push(conn);
            } else {
               kept.push_back(conn);
            }
         }

         state.idle = kept;
         state.destroyed += reclaimed.len() as u64;
         reclaimed
      };

      let count = reclaimed.len();
      for conn in reclaimed {
         conn.close().await;
      }

      if count > 0 {
         debug!(reclaimed = count, "Closed idle connections");
         self.publish_stats();
      }
      count
   }
}

impl Drop for PoolShared {
   fn drop(&mut self) {
      if let Some(reaper) = self.reaper.get_mut().take() {
         reaper.abort();
      }
   }
}

fn spawn_reaper(shared: &Arc<PoolShared>) -> JoinHandle<()> {
   let weak = Arc::downgrade(shared);
   let period = shared.config.reap_interval;

   tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
         ticker.tick().await;
         let Some(shared) = weak.upgrade() else {
            break;
         };
         if shared.state.lock().closed {
            break;
         }
         shared.reap_idle().await;
      }
   })
}

/// Releases a reserved `opening` slot if the acquire is cancelled while the
/// connection is being opened.
struct Reservation {
   shared: Arc<PoolShared>,
   armed: bool,
}

impl Drop for Reservation {
   fn drop(&mut self) {
      if self.armed {
         let mut state = self.shared.state.lock();
         state.opening -= 1;
         self.shared.fill_waiters(&mut state);
      }
   }
}

/// A caller waiting in the FIFO queue.
struct QueuedAcquire {
   shared: Arc<PoolShared>,
   id: u64,
   rx: oneshot::Receiver<Result<Connection>>,
   settled: bool,
}

impl QueuedAcquire {
   async fn wait(mut self, timeout: Duration) -> Result<Connection> {
      let started = Instant::now();
      let outcome = tokio::time::timeout(timeout, &mut self.rx).await;
      self.settled = true;

      match outcome {
         Ok(Ok(result)) => result,
         Ok(Err(_)) => Err(Error::PoolClosed),
         Err(_) => {
            let mut state = self.shared.state.lock();
            if state.remove_waiter(self.id) {
               state.timeouts += 1;
               drop(state);
               let waited = started.elapsed();
               debug!(waiter = self.id, waited_ms = waited.as_millis() as u64, "Acquire timed out");
               self.shared.publish_stats();
               return Err(Error::AcquireTimeout { waited });
            }
            drop(state);

            // Served while the timer fired; the connection is already in
            // the channel.
            self.rx.try_recv().unwrap_or(Err(Error::PoolClosed))
         }
      }
   }
}

impl Drop for QueuedAcquire {
   fn drop(&mut self) {
      if self.settled {
         return;
      }
      let removed = self.shared.state.lock().remove_waiter(self.id);
      if removed {
         trace!(waiter = self.id, "Queued acquire cancelled");
         self.shared.publish_stats();
      } else if let Ok(Ok(conn)) = self.rx.try_recv() {
         let _ = self.shared.check_in(conn);
      }
   }
}

/// RAII guard for a borrowed connection.
///
/// Dereferences to [`Connection`]. Dropping the guard releases the
/// connection back to the pool.
#[must_use = "if unused, the connection is immediately returned to the pool"]
pub struct PooledConnection {
   conn: Option<Connection>,
   pool: Arc<PoolShared>,
}

impl PooledConnection {
   /// Explicitly give the connection back to the pool.
   pub fn release(self) {
      drop(self);
   }

   /// Take the connection out of the guard. It stays checked out until it is
   /// passed to [`ConnectionPool::release`].
   pub fn detach(mut self) -> Connection {
      self.conn.take().expect("connection already taken")
   }
}

impl Drop for PooledConnection {
   fn drop(&mut self) {
      if let Some(conn) = self.conn.take() {
         let _ = self.pool.check_in(conn);
      }
   }
}

impl Deref for PooledConnection {
   type Target = Connection;

   fn deref(&self) -> &Self::Target {
      self.conn.as_ref().expect("connection already taken")
   }
}

impl DerefMut for PooledConnection {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self.conn.as_mut().expect("connection already taken")
   }
}

impl fmt::Debug for PooledConnection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("PooledConnection")
         .field("conn", &self.conn)
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use std::io;

   use super::*;

   #[derive(Clone, Default)]
   struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

   impl CapturedLogs {
      fn text(&self) -> String {
         String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
      }
   }

   impl io::Write for CapturedLogs {
      fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
         self.0.lock().unwrap().extend_from_slice(buf);
         Ok(buf.len())
      }

      fn flush(&mut self) -> io::Result<()> {
         Ok(())
      }
   }

   async fn test_pool(config: PoolConfig) -> (ConnectionPool, tempfile::TempDir) {
      let dir = tempfile::tempdir().unwrap();
      let pool = ConnectionPool::open(dir.path().join("unit.db"), config)
         .await
         .unwrap();
      (pool, dir)
   }

   #[tokio::test]
   async fn test_release_of_already_released_connection_is_noop() {
      let (pool, _dir) = test_pool(PoolConfig::new().with_pool_size(2).with_min_connections(0)).await;

      let conn = pool.acquire().await.unwrap().detach();
      // Simulate the first release having already removed it from the busy set
      pool.shared.state.lock().busy.remove(&conn.id());
      let before = pool.stats();

      let returned = pool.release(conn).unwrap_err();
      assert_eq!(returned.state(), ConnectionState::Busy);

      let after = pool.stats();
      assert_eq!(before, after);
      assert_eq!(after.busy, 0);
   }

   #[tokio::test]
   async fn test_cancelled_waiter_is_removed_from_queue() {
      let (pool, _dir) = test_pool(PoolConfig::new().with_pool_size(1).with_min_connections(0)).await;

      let held = pool.acquire().await.unwrap();
      let waiting = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
      assert!(waiting.is_err());
      assert_eq!(pool.stats().pending, 0);
      assert_eq!(pool.shared.state.lock().waiters.len(), 0);

      drop(held);
      assert_eq!(pool.stats().idle, 1);
   }

   #[tokio::test]
   async fn test_connection_left_in_transaction_is_discarded() {
      let (pool, _dir) = test_pool(PoolConfig::new().with_pool_size(2).with_min_connections(0)).await;

      let mut conn = pool.acquire().await.unwrap();
      conn.begin().await.unwrap();
      drop(conn);

      let stats = pool.stats();
      assert_eq!(stats.total, 0);
      assert_eq!(stats.destroyed, 1);
   }

   #[tokio::test]
   async fn test_replenish_for_departed_waiter_parks_connection_cleanly() {
      let (pool, _dir) = test_pool(PoolConfig::new().with_pool_size(2).with_min_connections(0)).await;

      let logs = CapturedLogs::default();
      let writer = logs.clone();
      let subscriber = tracing_subscriber::fmt()
         .with_ansi(false)
         .with_writer(move || writer.clone())
         .finish();
      let _guard = tracing::subscriber::set_default(subscriber);

      // A replenish was started for a waiter that timed out before it finished
      {
         let mut state = pool.shared.state.lock();
         state.opening += 1;
         state.replenishing += 1;
      }
      Arc::clone(&pool.shared).replenish().await;

      let stats = pool.stats();
      assert_eq!(stats.idle, 1);
      assert_eq!(stats.total, 1);
      assert_eq!(
         pool.shared.state.lock().idle.front().map(|c| c.state()),
         Some(ConnectionState::Available)
      );

      let logs = logs.text();
      assert!(!logs.contains("Rejected connection state change"), "{logs}");
   }
}
