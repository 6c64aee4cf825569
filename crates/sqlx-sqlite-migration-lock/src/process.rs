//! Process and host identity used to decide lock ownership

use std::sync::OnceLock;

/// Identifier of the machine this process runs on.
///
/// Resolved once and cached. Falls back to `"localhost"` when the name
/// cannot be read.
pub fn current_host() -> &'static str {
   static HOST: OnceLock<String> = OnceLock::new();
   HOST.get_or_init(|| hostname().unwrap_or_else(|| "localhost".to_string()))
}

#[cfg(unix)]
fn hostname() -> Option<String> {
   let mut buf = [0u8; 256];
   // SAFETY: buf is valid for writes of buf.len() bytes
   let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
   if rc != 0 {
      return None;
   }
   let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
   String::from_utf8(buf[..end].to_vec())
      .ok()
      .filter(|name| !name.is_empty())
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
   std::env::var("COMPUTERNAME").ok().filter(|name| !name.is_empty())
}

/// Check if a process with the given PID still exists on this host.
///
/// On unix this sends signal 0, which performs the existence and permission
/// checks without delivering anything. `EPERM` means the process exists but
/// belongs to another user. Elsewhere liveness cannot be checked and every
/// pid is assumed alive, leaving only the age rule.
pub fn is_process_alive(pid: u32) -> bool {
   #[cfg(unix)]
   {
      // 0 and negative values address process groups, not a process
      let Ok(pid) = libc::pid_t::try_from(pid) else {
         return false;
      };
      if pid <= 0 {
         return false;
      }

      // SAFETY: kill with signal 0 has no side effects
      if unsafe { libc::kill(pid, 0) } == 0 {
         return true;
      }
      std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
   }
   #[cfg(not(unix))]
   {
      let _ = pid;
      true
   }
}
