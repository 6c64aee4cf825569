use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::process::current_host;

/// Ownership record persisted as JSON inside the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
   pub pid: u32,
   pub host: String,
   #[serde(with = "time::serde::rfc3339")]
   pub created_at: OffsetDateTime,
   /// Database the migrations target
   pub database: PathBuf,
}

impl LockRecord {
   /// Record naming this process as owner, timestamped now.
   pub fn current(database: &Path) -> Self {
      Self {
         pid: std::process::id(),
         host: current_host().to_string(),
         created_at: OffsetDateTime::now_utc(),
         database: database.to_path_buf(),
      }
   }

   pub fn is_local(&self) -> bool {
      self.host == current_host()
   }

   /// Time since the record was written. Timestamps in the future count as
   /// zero age.
   pub fn age(&self, now: OffsetDateTime) -> Duration {
      Duration::try_from(now - self.created_at).unwrap_or(Duration::ZERO)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_json_shape() {
      let record = LockRecord {
         pid: 17,
         host: "db-host".into(),
         created_at: OffsetDateTime::UNIX_EPOCH,
         database: PathBuf::from("/var/lib/app.db"),
      };
      let json: serde_json::Value = serde_json::to_value(&record).unwrap();
      assert_eq!(
         json,
         serde_json::json!({
            "pid": 17,
            "host": "db-host",
            "created_at": "1970-01-01T00:00:00Z",
            "database": "/var/lib/app.db",
         })
      );
   }

   #[test]
   fn test_future_timestamp_has_zero_age() {
      let mut record = LockRecord::current(Path::new("app.db"));
      let now = OffsetDateTime::now_utc();
      record.created_at = now + time::Duration::minutes(5);
      assert_eq!(record.age(now), Duration::ZERO);

      record.created_at = now - time::Duration::minutes(5);
      assert_eq!(record.age(now), Duration::from_secs(300));
   }

   #[test]
   fn test_current_record_is_local() {
      let record = LockRecord::current(Path::new("app.db"));
      assert_eq!(record.pid, std::process::id());
      assert!(record.is_local());

      let foreign = LockRecord {
         host: format!("{}-elsewhere", record.host),
         ..record
      };
      assert!(!foreign.is_local());
   }
}
