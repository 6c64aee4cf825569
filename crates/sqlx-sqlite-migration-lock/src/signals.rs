//! Process-wide SIGINT/SIGTERM cleanup for held migration locks.
//!
//! Registering the first lock installs the runtime's signal handlers, which
//! stay installed for the life of the process. A single watcher task
//! therefore keeps listening after every lock is released: on a signal it
//! removes the lock files still registered, restores the default
//! disposition and raises the signal again so the process terminates the
//! way it would have without us.

use std::path::PathBuf;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Result;

struct Entry {
   id: u64,
   path: PathBuf,
   raw: Vec<u8>,
}

struct Registry {
   next_id: u64,
   held: Vec<Entry>,
   watcher: Option<JoinHandle<()>>,
}

static REGISTRY: Mutex<Registry> = parking_lot::const_mutex(Registry {
   next_id: 0,
   held: Vec::new(),
   watcher: None,
});

/// A lock file removed on interrupt until this is dropped.
#[derive(Debug)]
pub(crate) struct Registration {
   id: u64,
}

impl Drop for Registration {
   fn drop(&mut self) {
      REGISTRY.lock().held.retain(|entry| entry.id != self.id);
   }
}

/// Remove `path` on SIGINT/SIGTERM while it still contains `raw`.
///
/// Must be called from within a tokio runtime. Handlers are in place before
/// this returns.
pub(crate) fn register(path: PathBuf, raw: Vec<u8>) -> Result<Registration> {
   let mut registry = REGISTRY.lock();

   // A watcher dies with the runtime it was spawned on
   if !registry.watcher.as_ref().is_some_and(|w| !w.is_finished()) {
      registry.watcher = Some(spawn_watcher()?);
      debug!("Started migration lock signal watcher");
   }

   registry.next_id += 1;
   let id = registry.next_id;
   registry.held.push(Entry { id, path, raw });
   Ok(Registration { id })
}

#[cfg(unix)]
fn spawn_watcher() -> Result<JoinHandle<()>> {
   use tokio::signal::unix::{SignalKind, signal};

   let mut interrupt = signal(SignalKind::interrupt())?;
   let mut terminate = signal(SignalKind::terminate())?;

   Ok(tokio::spawn(async move {
      let signo = tokio::select! {
         _ = interrupt.recv() => libc::SIGINT,
         _ = terminate.recv() => libc::SIGTERM,
      };
      release_registered(signo).await;
      reraise(signo);
   }))
}

#[cfg(not(unix))]
fn spawn_watcher() -> Result<JoinHandle<()>> {
   Ok(tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
         release_registered(2).await;
         std::process::exit(128 + 2);
      }
   }))
}

async fn release_registered(signo: i32) {
   let held = std::mem::take(&mut REGISTRY.lock().held);

   for entry in held {
      let ours = tokio::fs::read(&entry.path)
         .await
         .is_ok_and(|current| current == entry.raw);
      if !ours {
         continue;
      }
      match tokio::fs::remove_file(&entry.path).await {
         Ok(()) => warn!(
            path = %entry.path.display(),
            signal = signo,
            "Interrupted while holding migration lock; lock released"
         ),
         Err(e) => warn!(
            path = %entry.path.display(),
            error = %e,
            "Failed to remove migration lock on interrupt"
         ),
      }
   }
}

#[cfg(unix)]
fn reraise(signo: i32) {
   // SAFETY: plain libc calls outside any signal handler; SIG_DFL is a
   // valid disposition for SIGINT and SIGTERM
   unsafe {
      libc::signal(signo, libc::SIG_DFL);
      libc::raise(signo);
   }
   // Only reached if the signal is blocked on this thread
   std::process::exit(128 + signo);
}
