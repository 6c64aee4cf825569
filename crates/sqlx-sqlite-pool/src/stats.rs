//! Pool statistics and the observer hook used to export them

use std::time::Duration;

/// Point-in-time view of pool bookkeeping.
///
/// Derived from the pool's live state on demand; never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
   /// Configured hard cap (`pool_size`)
   pub max_size: usize,
   /// Open connections, including ones still being created
   pub total: usize,
   pub busy: usize,
   pub idle: usize,
   /// Callers queued in `acquire()`
   pub pending: usize,
   pub created: u64,
   pub destroyed: u64,
   /// High-water mark of `busy`
   pub max_busy: usize,
   pub acquisitions: u64,
   pub releases: u64,
   pub timeouts: u64,
   /// Failed connection creations while serving an acquire
   pub errors: u64,
}

impl PoolStats {
   /// Ratio of busy to total connections, 0.0 for an empty pool.
   pub fn utilization(&self) -> f64 {
      if self.total == 0 {
         0.0
      } else {
         self.busy as f64 / self.total as f64
      }
   }

   /// True when every permitted connection is busy.
   pub fn is_saturated(&self) -> bool {
      self.busy >= self.max_size
   }
}

/// Receives pool and query events.
///
/// Attach one with [`ConnectionPool::with_observer`](crate::ConnectionPool::with_observer).
/// Callbacks run inline on the caller's task after pool locks have been
/// released, so implementations should be cheap and must not block.
pub trait PoolObserver: Send + Sync + 'static {
   /// A statement finished on a pooled connection.
   fn on_query(&self, _elapsed: Duration, _success: bool) {}

   /// A caller obtained a connection after waiting `_waited`.
   fn on_acquire(&self, _waited: Duration) {}

   /// Pool bookkeeping changed (after every acquire and release).
   fn on_stats(&self, _stats: &PoolStats) {}
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_utilization() {
      let stats = PoolStats {
         max_size: 10,
         total: 8,
         busy: 6,
         idle: 2,
         ..Default::default()
      };
      assert_eq!(stats.utilization(), 0.75);
      assert!(!stats.is_saturated());
   }

   #[test]
   fn test_empty_pool_has_zero_utilization() {
      assert_eq!(PoolStats::default().utilization(), 0.0);
   }
}
