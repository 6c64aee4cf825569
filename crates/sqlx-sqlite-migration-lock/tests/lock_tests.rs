//! Integration tests for MigrationLock against a real filesystem.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sqlx_sqlite_migration_lock::{Error, LockConfig, LockRecord, MigrationLock, current_host};
use tempfile::TempDir;
use time::OffsetDateTime;

fn fast_config() -> LockConfig {
   LockConfig::new()
      .with_timeout(Duration::from_millis(200))
      .with_retry_interval(Duration::from_millis(20))
}

fn init_tracing() {
   let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn db_path(dir: &TempDir) -> PathBuf {
   dir.path().join("app.db")
}

fn write_record(lock: &MigrationLock, record: &LockRecord) {
   std::fs::write(lock.path(), serde_json::to_vec(record).unwrap()).unwrap();
}

#[cfg(unix)]
fn dead_pid() -> u32 {
   let mut child = std::process::Command::new("true").spawn().unwrap();
   let pid = child.id();
   child.wait().unwrap();
   pid
}

// ============================================================================
// Mutual exclusion
// ============================================================================

#[tokio::test]
async fn test_acquire_writes_owner_record() {
   let dir = tempfile::tempdir().unwrap();
   let mut lock = MigrationLock::new(db_path(&dir), fast_config()).unwrap();

   lock.acquire().await.unwrap();
   assert!(lock.is_held());
   assert!(lock.path().ends_with("app.db.migration.lock"));

   let record = lock.read_record().await.unwrap().unwrap();
   assert_eq!(record.pid, std::process::id());
   assert_eq!(record.host, current_host());
   assert_eq!(record.database, db_path(&dir));

   // Re-acquiring a held lock is a no-op
   lock.acquire().await.unwrap();

   lock.release().await.unwrap();
   assert!(!lock.is_held());
   assert!(!lock.path().exists());
}

#[tokio::test]
async fn test_second_instance_waits_for_release() {
   let dir = tempfile::tempdir().unwrap();
   let mut first = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
   let mut second = MigrationLock::new(db_path(&dir), fast_config()).unwrap();

   first.acquire().await.unwrap();

   let started = Instant::now();
   let err = second.acquire().await.unwrap_err();
   assert!(started.elapsed() >= Duration::from_millis(200));
   match err {
      Error::LockTimeout { holder, .. } => {
         assert_eq!(holder.unwrap().pid, std::process::id());
      }
      other => panic!("expected LockTimeout, got {other:?}"),
   }

   first.release().await.unwrap();
   second.acquire().await.unwrap();
   assert!(second.is_held());
}

#[tokio::test]
async fn test_concurrent_acquire_has_one_winner() {
   let dir = tempfile::tempdir().unwrap();
   let mut a = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
   let mut b = MigrationLock::new(db_path(&dir), fast_config()).unwrap();

   let (ra, rb) = tokio::join!(a.acquire(), b.acquire());
   assert_eq!(
      [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count(),
      1
   );
   assert_ne!(a.is_held(), b.is_held());
}

#[tokio::test]
async fn test_waiter_acquires_once_holder_releases() {
   let dir = tempfile::tempdir().unwrap();
   let mut holder = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
   holder.acquire().await.unwrap();

   let config = fast_config().with_timeout(Duration::from_secs(2));
   let mut waiter = MigrationLock::new(db_path(&dir), config).unwrap();
   let waiting = tokio::spawn(async move {
      let acquired = waiter.acquire().await;
      acquired.map(|()| waiter)
   });

   tokio::time::sleep(Duration::from_millis(60)).await;
   assert!(!waiting.is_finished());
   holder.release().await.unwrap();

   let waiter = waiting.await.unwrap().unwrap();
   assert!(waiter.is_held());
}

// ============================================================================
// Staleness
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_dead_owner_reclaimed_within_one_retry() {
   init_tracing();
   let dir = tempfile::tempdir().unwrap();
   let config = fast_config().with_retry_interval(Duration::from_millis(500));
   let mut lock = MigrationLock::new(db_path(&dir), config).unwrap();

   let pid = dead_pid();
   let abandoned = LockRecord {
      pid,
      ..LockRecord::current(&db_path(&dir))
   };
   write_record(&lock, &abandoned);

   let started = Instant::now();
   lock.acquire().await.unwrap();
   assert!(started.elapsed() < Duration::from_millis(500));

   let record = lock.read_record().await.unwrap().unwrap();
   assert_eq!(record.pid, std::process::id());
   assert_ne!(record, abandoned);
}

#[tokio::test]
async fn test_expired_lock_reclaimed_regardless_of_owner() {
   init_tracing();
   let dir = tempfile::tempdir().unwrap();
   let mut lock = MigrationLock::new(db_path(&dir), fast_config()).unwrap();

   write_record(
      &lock,
      &LockRecord {
         pid: 1,
         host: "some-other-host.invalid".into(),
         created_at: OffsetDateTime::now_utc() - time::Duration::minutes(20),
         database: db_path(&dir),
      },
   );

   lock.acquire().await.unwrap();
   assert_eq!(
      lock.read_record().await.unwrap().unwrap().host,
      current_host()
   );
}

#[tokio::test]
async fn test_fresh_foreign_lock_is_respected() {
   let dir = tempfile::tempdir().unwrap();
   let mut lock = MigrationLock::new(db_path(&dir), fast_config()).unwrap();

   let foreign = LockRecord {
      pid: 1,
      host: "some-other-host.invalid".into(),
      created_at: OffsetDateTime::now_utc(),
      database: db_path(&dir),
   };
   write_record(&lock, &foreign);

   assert!(!lock.is_stale(&foreign, OffsetDateTime::now_utc()));
   assert!(matches!(
      lock.acquire().await,
      Err(Error::LockTimeout { .. })
   ));
   assert_eq!(lock.read_record().await.unwrap(), Some(foreign));
}

#[tokio::test]
async fn test_unreadable_lock_file_is_not_reclaimed_while_fresh() {
   let dir = tempfile::tempdir().unwrap();
   let mut lock = MigrationLock::new(db_path(&dir), fast_config()).unwrap();

   // A competitor that has created but not yet written the file
   std::fs::write(lock.path(), b"").unwrap();

   assert!(matches!(
      lock.acquire().await,
      Err(Error::LockTimeout { holder: None, .. })
   ));
   assert!(lock.path().exists());
}

// ============================================================================
// Release
// ============================================================================

#[tokio::test]
async fn test_release_refuses_foreign_owner() {
   let dir = tempfile::tempdir().unwrap();
   let mut lock = MigrationLock::new(db_path(&dir), fast_config()).unwrap();

   write_record(
      &lock,
      &LockRecord {
         pid: 1,
         host: "some-other-host.invalid".into(),
         created_at: OffsetDateTime::now_utc(),
         database: db_path(&dir),
      },
   );

   match lock.release().await {
      Err(Error::NotOwner { holder, .. }) => assert_eq!(holder.unwrap().pid, 1),
      other => panic!("expected NotOwner, got {other:?}"),
   }
   assert!(lock.path().exists());

   lock.force_release().await.unwrap();
   assert!(!lock.path().exists());
}

#[tokio::test]
async fn test_release_after_reclaim_keeps_new_owner() {
   let dir = tempfile::tempdir().unwrap();
   let mut lock = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
   lock.acquire().await.unwrap();

   // Someone else reclaimed our lock and took it over
   let replacement = LockRecord {
      host: "some-other-host.invalid".into(),
      ..LockRecord::current(&db_path(&dir))
   };
   write_record(&lock, &replacement);

   assert!(matches!(
      lock.release().await,
      Err(Error::NotOwner { .. })
   ));
   assert_eq!(lock.read_record().await.unwrap(), Some(replacement.clone()));

   // Dropping must not remove a file we no longer own
   drop(lock);
   assert!(dir.path().join("app.db.migration.lock").exists());
}

#[tokio::test]
async fn test_release_refuses_other_instance_in_same_process() {
   let dir = tempfile::tempdir().unwrap();
   let mut owner = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
   let mut bystander = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
   owner.acquire().await.unwrap();

   // Same pid and host in the record, but the bystander never acquired it
   match bystander.release().await {
      Err(Error::NotOwner { holder, .. }) => {
         assert_eq!(holder.unwrap().pid, std::process::id());
      }
      other => panic!("expected NotOwner, got {other:?}"),
   }
   assert!(owner.is_held());
   assert!(owner.path().exists());

   owner.release().await.unwrap();
   assert!(!owner.path().exists());
}

#[tokio::test]
async fn test_release_without_file_is_ok() {
   let dir = tempfile::tempdir().unwrap();
   let mut lock = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
   lock.release().await.unwrap();
}

#[tokio::test]
async fn test_drop_removes_held_lock() {
   let dir = tempfile::tempdir().unwrap();
   let path = {
      let mut lock = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
      lock.acquire().await.unwrap();
      lock.path().to_path_buf()
   };
   assert!(!path.exists());
}

// ============================================================================
// Scoped locking
// ============================================================================

#[tokio::test]
async fn test_with_lock_holds_during_body() {
   let dir = tempfile::tempdir().unwrap();
   let mut lock = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
   let lock_file = lock.path().to_path_buf();

   let seen = lock
      .with_lock(async || Ok::<_, Error>(Path::new(&lock_file).exists()))
      .await
      .unwrap();
   assert!(seen);
   assert!(!lock_file.exists());
}

#[tokio::test]
async fn test_with_lock_releases_on_error() {
   let dir = tempfile::tempdir().unwrap();
   let mut lock = MigrationLock::new(db_path(&dir), fast_config()).unwrap();

   let result: Result<(), Error> = lock
      .with_lock(async || Err(Error::InvalidConfig("migration failed".into())))
      .await;

   assert!(matches!(result, Err(Error::InvalidConfig(_))));
   assert!(!lock.is_held());
   assert!(!lock.path().exists());
}

#[tokio::test]
async fn test_with_lock_propagates_timeout() {
   let dir = tempfile::tempdir().unwrap();
   let mut holder = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
   holder.acquire().await.unwrap();

   let mut other = MigrationLock::new(db_path(&dir), fast_config()).unwrap();
   let mut ran = false;
   let result = other
      .with_lock(async || {
         ran = true;
         Ok::<_, Error>(())
      })
      .await;

   assert!(matches!(result, Err(Error::LockTimeout { .. })));
   assert!(!ran);
   assert!(holder.path().exists());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
   let config = LockConfig::new().with_stale_after(Duration::ZERO);
   assert!(matches!(
      MigrationLock::new("app.db", config),
      Err(Error::InvalidConfig(_))
   ));
}
