//! File-based mutual exclusion for schema migrations.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

use crate::config::LockConfig;
use crate::process::is_process_alive;
use crate::record::LockRecord;
use crate::signals::{self, Registration};
use crate::{Error, Result};

const LOCK_SUFFIX: &str = ".migration.lock";

/// Path of the lock file guarding `database`: `<file name>.migration.lock`
/// in the same directory.
pub fn lock_path_for(database: &Path) -> PathBuf {
   let mut name = database
      .file_name()
      .map(|n| n.to_os_string())
      .unwrap_or_default();
   name.push(LOCK_SUFFIX);
   database.with_file_name(name)
}

/// Why a lock was judged abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
   /// Older than `stale_after`, whoever owns it
   Expired { age: Duration },
   /// Owned by a pid on this host that no longer exists
   DeadOwner { pid: u32 },
}

impl fmt::Display for StaleReason {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         StaleReason::Expired { age } => write!(f, "expired after {}s", age.as_secs()),
         StaleReason::DeadOwner { pid } => write!(f, "owner pid {pid} is gone"),
      }
   }
}

/// What was found in an existing lock file.
struct Observed {
   raw: Vec<u8>,
   holder: Holder,
}

enum Holder {
   Record(LockRecord),
   /// Half-written or corrupt file; only its mtime can age it out
   Unreadable { modified: Option<SystemTime> },
}

/// Lock we currently own.
struct Held {
   /// Exact bytes we wrote; ownership is re-checked against these
   raw: Vec<u8>,
   record: LockRecord,
   _signals: Option<Registration>,
}

/// Cross-process lock serializing migrations against one database file.
///
/// The lock is a file created with `O_EXCL` next to the database holding a
/// JSON [`LockRecord`]. Competing processes retry until the file disappears
/// or is judged stale:
///
/// - any lock older than `stale_after` is stale
/// - a lock from this host whose pid no longer exists is stale
/// - a lock from another host is never judged by pid
///
/// Dropping a held lock removes the file if it is still ours.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_migration_lock::{LockConfig, MigrationLock};
///
/// # async fn example() -> Result<(), sqlx_sqlite_migration_lock::Error> {
/// let mut lock = MigrationLock::new("app.db", LockConfig::default())?;
/// lock.with_lock(async || {
///    // apply migrations
///    Ok::<_, sqlx_sqlite_migration_lock::Error>(())
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub struct MigrationLock {
   path: PathBuf,
   database: PathBuf,
   config: LockConfig,
   held: Option<Held>,
}

impl MigrationLock {
   /// Lock for the database at `database`. Nothing touches the filesystem
   /// until [`acquire`](Self::acquire).
   pub fn new(database: impl AsRef<Path>, config: LockConfig) -> Result<Self> {
      config.validate()?;
      let database = database.as_ref().to_path_buf();

      Ok(Self {
         path: lock_path_for(&database),
         database,
         config,
         held: None,
      })
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn config(&self) -> &LockConfig {
      &self.config
   }

   /// True while this instance owns the lock.
   pub fn is_held(&self) -> bool {
      self.held.is_some()
   }

   /// Record currently in the lock file, `None` if there is no lock file.
   pub async fn read_record(&self) -> Result<Option<LockRecord>> {
      match fs::read(&self.path).await {
         Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
         Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
         Err(e) => Err(e.into()),
      }
   }

   /// Take the lock, retrying every `retry_interval` for up to `timeout`.
   ///
   /// Stale locks are removed (logged at warn) and the attempt repeated
   /// immediately. Acquiring a lock this instance already holds is a no-op.
   pub async fn acquire(&mut self) -> Result<()> {
      if self.held.is_some() {
         return Ok(());
      }

      let started = Instant::now();
      let mut attempts: u32 = 0;

      loop {
         attempts += 1;
         let record = LockRecord::current(&self.database);
         let raw = serde_json::to_vec_pretty(&record)?;

         match self.try_create(&raw).await {
            Ok(()) => {
               let registration = if self.config.release_on_signal {
                  match signals::register(self.path.clone(), raw.clone()) {
                     Ok(registration) => Some(registration),
                     Err(e) => {
                        remove_if_exists(&self.path).await?;
                        return Err(e);
                     }
                  }
               } else {
                  None
               };
               info!(
                  path = %self.path.display(),
                  attempts,
                  waited_ms = started.elapsed().as_millis() as u64,
                  "Acquired migration lock"
               );
               self.held = Some(Held {
                  raw,
                  record,
                  _signals: registration,
               });
               return Ok(());
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
         }

         if self.reclaim_if_stale().await? {
            continue;
         }

         let waited = started.elapsed();
         if waited >= self.config.timeout {
            let holder = self.read_record().await.ok().flatten().map(Box::new);
            return Err(Error::LockTimeout {
               path: self.path.clone(),
               waited,
               holder,
            });
         }

         trace!(path = %self.path.display(), attempts, "Migration lock busy, retrying");
         let remaining = self.config.timeout - waited;
         tokio::time::sleep(self.config.retry_interval.min(remaining)).await;
      }
   }

   async fn try_create(&self, raw: &[u8]) -> std::io::Result<()> {
      let mut file = fs::OpenOptions::new()
         .write(true)
         .create_new(true)
         .open(&self.path)
         .await?;

      let written = async {
         file.write_all(raw).await?;
         file.sync_all().await
      }
      .await;

      if let Err(e) = written {
         drop(file);
         let _ = fs::remove_file(&self.path).await;
         return Err(e);
      }
      Ok(())
   }

   async fn observe(&self) -> Result<Option<Observed>> {
      let raw = match fs::read(&self.path).await {
         Ok(raw) => raw,
         Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
         Err(e) => return Err(e.into()),
      };

      let holder = match serde_json::from_slice::<LockRecord>(&raw) {
         Ok(record) => Holder::Record(record),
         Err(_) => {
            let modified = fs::metadata(&self.path)
               .await
               .ok()
               .and_then(|m| m.modified().ok());
            Holder::Unreadable { modified }
         }
      };

      Ok(Some(Observed { raw, holder }))
   }

   /// Returns true when the caller should retry immediately: the lock file
   /// vanished, changed, or was stale and has been removed.
   async fn reclaim_if_stale(&self) -> Result<bool> {
      let Some(observed) = self.observe().await? else {
         return Ok(true);
      };

      let reason = match &observed.holder {
         Holder::Record(record) => self.stale_reason(record, OffsetDateTime::now_utc()),
         Holder::Unreadable { modified } => modified
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .filter(|age| *age > self.config.stale_after)
            .map(|age| StaleReason::Expired { age }),
      };
      let Some(reason) = reason else {
         return Ok(false);
      };

      // Another process may have reclaimed and re-created it in between
      match fs::read(&self.path).await {
         Ok(raw) if raw == observed.raw => {}
         Ok(_) => return Ok(true),
         Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
         Err(e) => return Err(e.into()),
      }

      match &observed.holder {
         Holder::Record(record) => warn!(
            path = %self.path.display(),
            pid = record.pid,
            host = %record.host,
            reason = %reason,
            "Removing stale migration lock; a previous migration run did not finish cleanly"
         ),
         Holder::Unreadable { .. } => warn!(
            path = %self.path.display(),
            reason = %reason,
            "Removing stale unreadable migration lock"
         ),
      }
      remove_if_exists(&self.path).await?;
      Ok(true)
   }

   /// Why `record` counts as abandoned at `now`, if it does.
   pub fn stale_reason(&self, record: &LockRecord, now: OffsetDateTime) -> Option<StaleReason> {
      let age = record.age(now);
      if age > self.config.stale_after {
         return Some(StaleReason::Expired { age });
      }
      if record.is_local() && !is_process_alive(record.pid) {
         return Some(StaleReason::DeadOwner { pid: record.pid });
      }
      None
   }

   pub fn is_stale(&self, record: &LockRecord, now: OffsetDateTime) -> bool {
      self.stale_reason(record, now).is_some()
   }

   /// Delete the lock file after checking that this instance wrote it.
   ///
   /// A missing file is not an error. Any other file, including one naming
   /// this process that a different `MigrationLock` acquired, is left in
   /// place and reported as [`Error::NotOwner`].
   pub async fn release(&mut self) -> Result<()> {
      let Some(observed) = self.observe().await? else {
         debug!(path = %self.path.display(), "Migration lock already gone");
         self.disarm();
         return Ok(());
      };

      // Same pid and host is not enough: another instance in this process
      // may be the one holding it
      let ours = match (&observed.holder, &self.held) {
         (Holder::Record(_), Some(held)) => observed.raw == held.raw,
         _ => false,
      };

      if !ours {
         let holder = match observed.holder {
            Holder::Record(record) => Some(Box::new(record)),
            Holder::Unreadable { .. } => None,
         };
         return Err(Error::NotOwner {
            path: self.path.clone(),
            holder,
         });
      }

      remove_if_exists(&self.path).await?;
      self.disarm();
      info!(path = %self.path.display(), "Released migration lock");
      Ok(())
   }

   /// Delete the lock file without checking ownership.
   ///
   /// Only for locks the caller has already established to be stale.
   pub async fn force_release(&mut self) -> Result<()> {
      remove_if_exists(&self.path).await?;
      self.disarm();
      warn!(path = %self.path.display(), "Force-released migration lock");
      Ok(())
   }

   /// Run `f` while holding the lock, releasing it on every exit path.
   ///
   /// An error from `f` takes precedence over a failed release, which is
   /// then only logged.
   pub async fn with_lock<T, E, F>(&mut self, f: F) -> std::result::Result<T, E>
   where
      F: AsyncFnOnce() -> std::result::Result<T, E>,
      E: From<Error>,
   {
      self.acquire().await?;
      let result = f().await;

      match self.release().await {
         Ok(()) => result,
         Err(release_err) => match result {
            Ok(_) => Err(release_err.into()),
            Err(err) => {
               warn!(
                  path = %self.path.display(),
                  error = %release_err,
                  "Failed to release migration lock after error"
               );
               Err(err)
            }
         },
      }
   }

   fn disarm(&mut self) {
      self.held = None;
   }
}

impl fmt::Debug for MigrationLock {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("MigrationLock")
         .field("path", &self.path)
         .field("held_since", &self.held.as_ref().map(|h| h.record.created_at))
         .finish()
   }
}

impl Drop for MigrationLock {
   fn drop(&mut self) {
      let Some(held) = self.held.take() else {
         return;
      };

      // Drop cannot await
      if let Ok(raw) = std::fs::read(&self.path)
         && raw == held.raw
      {
         match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed migration lock on drop"),
            Err(e) => warn!(
               path = %self.path.display(),
               error = %e,
               "Failed to remove migration lock on drop"
            ),
         }
      }
   }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
   match fs::remove_file(path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn lock(config: LockConfig) -> MigrationLock {
      MigrationLock::new("/data/app.db", config).unwrap()
   }

   #[test]
   fn test_lock_path_sits_next_to_database() {
      assert_eq!(
         lock_path_for(Path::new("/data/app.db")),
         PathBuf::from("/data/app.db.migration.lock")
      );
      assert_eq!(
         lock_path_for(Path::new("app.db")),
         PathBuf::from("app.db.migration.lock")
      );
   }

   #[test]
   fn test_foreign_host_only_expires_by_age() {
      let lock = lock(LockConfig::default());
      let now = OffsetDateTime::now_utc();
      let mut record = LockRecord {
         pid: u32::MAX,
         host: "some-other-host.invalid".into(),
         created_at: now - time::Duration::minutes(14),
         database: PathBuf::from("/data/app.db"),
      };
      assert_eq!(lock.stale_reason(&record, now), None);

      record.created_at = now - time::Duration::minutes(16);
      assert!(matches!(
         lock.stale_reason(&record, now),
         Some(StaleReason::Expired { .. })
      ));
   }

   #[test]
   fn test_live_local_owner_is_not_stale() {
      let lock = lock(LockConfig::default());
      let record = LockRecord::current(Path::new("/data/app.db"));
      assert!(!lock.is_stale(&record, OffsetDateTime::now_utc()));
   }

   #[cfg(unix)]
   #[test]
   fn test_dead_local_owner_is_stale() {
      let mut child = std::process::Command::new("true").spawn().unwrap();
      let pid = child.id();
      child.wait().unwrap();

      let lock = lock(LockConfig::default());
      let record = LockRecord {
         pid,
         ..LockRecord::current(Path::new("/data/app.db"))
      };
      assert_eq!(
         lock.stale_reason(&record, OffsetDateTime::now_utc()),
         Some(StaleReason::DeadOwner { pid })
      );
   }
}
