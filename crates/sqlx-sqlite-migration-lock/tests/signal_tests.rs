//! Interrupt cleanup. Each case re-runs this test binary as a child that
//! sends itself SIGTERM, so the signal never reaches the test harness.

#![cfg(unix)]

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus};
use std::time::Duration;

use sqlx_sqlite_migration_lock::{LockConfig, MigrationLock, lock_path_for};

const CHILD_MODE: &str = "MIGRATION_LOCK_SIGNAL_MODE";
const CHILD_DB: &str = "MIGRATION_LOCK_SIGNAL_DB";

/// Body of the child process; a no-op when run by the harness directly.
#[tokio::test]
async fn interrupted_child() {
   let (Ok(mode), Ok(db)) = (std::env::var(CHILD_MODE), std::env::var(CHILD_DB)) else {
      return;
   };

   let config = LockConfig::new().with_release_on_signal(true);
   let mut lock = MigrationLock::new(&db, config).unwrap();
   lock.acquire().await.unwrap();
   if mode == "released" {
      lock.release().await.unwrap();
   }

   // SAFETY: raise has no preconditions
   unsafe {
      libc::raise(libc::SIGTERM);
   }
   tokio::time::sleep(Duration::from_secs(5)).await;

   // Still alive: report it as a clean exit so the parent notices
   std::process::exit(0);
}

fn run_child(mode: &str, db: &Path) -> ExitStatus {
   Command::new(std::env::current_exe().unwrap())
      .args(["interrupted_child", "--exact", "--nocapture", "--test-threads=1"])
      .env(CHILD_MODE, mode)
      .env(CHILD_DB, db)
      .status()
      .unwrap()
}

#[test]
fn test_interrupt_while_held_removes_lock_and_terminates() {
   let dir = tempfile::tempdir().unwrap();
   let db = dir.path().join("app.db");

   let status = run_child("held", &db);
   assert_eq!(status.signal(), Some(libc::SIGTERM), "child status: {status}");
   assert!(!lock_path_for(&db).exists());
}

#[test]
fn test_interrupt_after_release_still_terminates() {
   let dir = tempfile::tempdir().unwrap();
   let db = dir.path().join("app.db");

   let status = run_child("released", &db);
   assert_eq!(status.signal(), Some(libc::SIGTERM), "child status: {status}");
   assert!(!lock_path_for(&db).exists());
}
