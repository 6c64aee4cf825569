use std::fmt;
use std::time::{Duration, Instant};

use time::OffsetDateTime;

/// Pool health conditions the collector watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlertKind {
   /// Busy / total connections above the utilization threshold
   HighUtilization,
   /// More queued acquires than the pending threshold
   HighPendingRequests,
   /// Acquisition or query error rate above the error-rate threshold
   HighErrorRate,
   /// Every connection busy while callers are still queued
   PoolExhausted,
}

impl AlertKind {
   pub const ALL: [AlertKind; 4] = [
      AlertKind::HighUtilization,
      AlertKind::HighPendingRequests,
      AlertKind::HighErrorRate,
      AlertKind::PoolExhausted,
   ];

   pub fn as_str(self) -> &'static str {
      match self {
         AlertKind::HighUtilization => "high_utilization",
         AlertKind::HighPendingRequests => "high_pending_requests",
         AlertKind::HighErrorRate => "high_error_rate",
         AlertKind::PoolExhausted => "pool_exhausted",
      }
   }
}

impl fmt::Display for AlertKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Per-kind alert bookkeeping.
///
/// `INACTIVE -> ACTIVE` when the condition first holds, stays `ACTIVE`
/// (silent inside the cooldown, re-raised after it) while the condition
/// holds, and returns to `INACTIVE` with a resolution when it clears.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertState {
   pub active: bool,
   pub last_alert_at: Option<Instant>,
   pub occurrence_count: u64,
}

/// What an evaluation decided to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
   Raise,
   Resolve,
}

impl AlertState {
   /// Feed the current truth of the condition and return the event to emit,
   /// if any.
   pub fn evaluate(
      &mut self,
      triggered: bool,
      now: Instant,
      cooldown: Duration,
   ) -> Option<AlertTransition> {
      if triggered {
         let cooled_down = self
            .last_alert_at
            .is_none_or(|last| now.saturating_duration_since(last) >= cooldown);

         if !self.active || cooled_down {
            self.active = true;
            self.last_alert_at = Some(now);
            self.occurrence_count += 1;
            return Some(AlertTransition::Raise);
         }
         None
      } else if self.active {
         self.active = false;
         Some(AlertTransition::Resolve)
      } else {
         None
      }
   }
}

/// A raised alert.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
   pub kind: AlertKind,
   /// Observed value that crossed the threshold
   pub value: f64,
   pub threshold: f64,
   pub message: String,
   /// How many times this kind has fired since the collector started
   pub occurrence: u64,
   pub raised_at: OffsetDateTime,
}

/// Delivered to alert subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
   Raised(Alert),
   Resolved {
      kind: AlertKind,
      resolved_at: OffsetDateTime,
   },
}

impl AlertEvent {
   pub fn kind(&self) -> AlertKind {
      match self {
         AlertEvent::Raised(alert) => alert.kind,
         AlertEvent::Resolved { kind, .. } => *kind,
      }
   }

   pub fn is_raised(&self) -> bool {
      matches!(self, AlertEvent::Raised(_))
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   const COOLDOWN: Duration = Duration::from_secs(60);

   #[test]
   fn test_first_trigger_raises() {
      let mut state = AlertState::default();
      let now = Instant::now();

      assert_eq!(
         state.evaluate(true, now, COOLDOWN),
         Some(AlertTransition::Raise)
      );
      assert!(state.active);
      assert_eq!(state.occurrence_count, 1);
      assert_eq!(state.last_alert_at, Some(now));
   }

   #[test]
   fn test_sustained_condition_silent_inside_cooldown() {
      let mut state = AlertState::default();
      let start = Instant::now();
      state.evaluate(true, start, COOLDOWN);

      for secs in [1, 10, 59] {
         let later = start + Duration::from_secs(secs);
         assert_eq!(state.evaluate(true, later, COOLDOWN), None);
      }
      assert_eq!(state.occurrence_count, 1);
   }

   #[test]
   fn test_sustained_condition_reraises_after_cooldown() {
      let mut state = AlertState::default();
      let start = Instant::now();
      state.evaluate(true, start, COOLDOWN);

      assert_eq!(
         state.evaluate(true, start + COOLDOWN, COOLDOWN),
         Some(AlertTransition::Raise)
      );
      assert_eq!(state.occurrence_count, 2);
   }

   #[test]
   fn test_clearing_resolves_once() {
      let mut state = AlertState::default();
      let now = Instant::now();
      state.evaluate(true, now, COOLDOWN);

      assert_eq!(
         state.evaluate(false, now, COOLDOWN),
         Some(AlertTransition::Resolve)
      );
      assert_eq!(state.evaluate(false, now, COOLDOWN), None);
      assert!(!state.active);
   }

   #[test]
   fn test_inactive_and_false_is_silent() {
      let mut state = AlertState::default();
      assert_eq!(state.evaluate(false, Instant::now(), COOLDOWN), None);
      assert_eq!(state, AlertState::default());
   }
}
