use std::fmt;

use sqlx_sqlite_pool::PoolStats;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::alert::AlertKind;

/// Immutable, timestamped view of pool health with derived ratios.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
   pub taken_at: OffsetDateTime,
   pub connections: PoolStats,
   /// busy / total
   pub connection_utilization: f64,
   /// failed acquires (timeouts and creation errors) / acquire attempts
   pub acquisition_error_rate: f64,
   /// failed queries / total queries
   pub query_error_rate: f64,
   pub total_queries: u64,
   pub failed_queries: u64,
   pub slow_queries: u64,
   pub avg_query_ms: f64,
   pub max_query_ms: f64,
   pub total_acquisitions: u64,
   pub avg_acquisition_ms: f64,
   pub max_acquisition_ms: f64,
}

/// Human-readable rollup of the latest snapshot and active alerts.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceReport {
   pub snapshot: MetricsSnapshot,
   pub active_alerts: Vec<AlertKind>,
}

impl fmt::Display for PerformanceReport {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let s = &self.snapshot;
      let c = &s.connections;
      let taken_at = s
         .taken_at
         .format(&Rfc3339)
         .unwrap_or_else(|_| s.taken_at.to_string());

      writeln!(f, "Connection pool report ({taken_at})")?;
      writeln!(
         f,
         "  connections: {} total, {} busy, {} idle, {} pending (max {}, peak busy {})",
         c.total, c.busy, c.idle, c.pending, c.max_size, c.max_busy
      )?;
      writeln!(
         f,
         "  utilization: {:.1}%",
         s.connection_utilization * 100.0
      )?;
      writeln!(
         f,
         "  acquisitions: {} ok, {} timeouts, {} errors ({:.2}% error rate), avg {:.1}ms, max {:.1}ms",
         c.acquisitions,
         c.timeouts,
         c.errors,
         s.acquisition_error_rate * 100.0,
         s.avg_acquisition_ms,
         s.max_acquisition_ms
      )?;
      writeln!(
         f,
         "  queries: {} total, {} failed ({:.2}% error rate), {} slow, avg {:.1}ms, max {:.1}ms",
         s.total_queries,
         s.failed_queries,
         s.query_error_rate * 100.0,
         s.slow_queries,
         s.avg_query_ms,
         s.max_query_ms
      )?;

      if self.active_alerts.is_empty() {
         write!(f, "  active alerts: none")
      } else {
         let names: Vec<&str> = self.active_alerts.iter().map(|k| k.as_str()).collect();
         write!(f, "  active alerts: {}", names.join(", "))
      }
   }
}
