//! Turns raw pool counters into snapshots, reports and alert events.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sqlx_sqlite_pool::{PoolObserver, PoolStats};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::Result;
use crate::alert::{Alert, AlertEvent, AlertKind, AlertState, AlertTransition};
use crate::config::MetricsConfig;
use crate::snapshot::{MetricsSnapshot, PerformanceReport};
use crate::stream::AlertStream;

/// Queries slower than this are counted as slow.
pub const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(1000);

/// Collects pool health signals and raises edge-triggered alerts.
///
/// Feed it with [`update_connection_metrics`](Self::update_connection_metrics),
/// [`record_query`](Self::record_query) and
/// [`record_acquisition`](Self::record_acquisition), or attach it to a pool as
/// a [`PoolObserver`] and let the pool feed it. Alerts are delivered through
/// [`subscribe`](Self::subscribe) and also returned from
/// [`check_alerts`](Self::check_alerts).
pub struct MetricsCollector {
   config: MetricsConfig,
   state: Arc<Mutex<CollectorState>>,
   alerts_tx: broadcast::Sender<AlertEvent>,
}

#[derive(Default)]
struct Timings {
   count: u64,
   total: Duration,
   max: Duration,
}

impl Timings {
   fn record(&mut self, elapsed: Duration) {
      self.count += 1;
      self.total += elapsed;
      self.max = self.max.max(elapsed);
   }

   fn avg_ms(&self) -> f64 {
      if self.count == 0 {
         0.0
      } else {
         self.total.as_micros() as f64 / 1000.0 / self.count as f64
      }
   }

   fn max_ms(&self) -> f64 {
      self.max.as_micros() as f64 / 1000.0
   }
}

#[derive(Default)]
struct CollectorState {
   connections: PoolStats,
   queries: Timings,
   failed_queries: u64,
   slow_queries: u64,
   acquisitions: Timings,
   latest: Option<MetricsSnapshot>,
   alerts: BTreeMap<AlertKind, AlertState>,
}

impl CollectorState {
   fn active_kinds(&self) -> Vec<AlertKind> {
      self
         .alerts
         .iter()
         .filter(|(_, state)| state.active)
         .map(|(kind, _)| *kind)
         .collect()
   }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
   if denominator == 0 {
      0.0
   } else {
      numerator as f64 / denominator as f64
   }
}

impl MetricsCollector {
   pub fn new(config: MetricsConfig) -> Result<Self> {
      config.validate()?;

      let (alerts_tx, _) = broadcast::channel(config.channel_capacity);
      let state = CollectorState {
         alerts: AlertKind::ALL
            .iter()
            .map(|kind| (*kind, AlertState::default()))
            .collect(),
         ..Default::default()
      };

      Ok(Self {
         config,
         state: Arc::new(Mutex::new(state)),
         alerts_tx,
      })
   }

   pub fn config(&self) -> &MetricsConfig {
      &self.config
   }

   /// Replace the collector's view of pool bookkeeping.
   pub fn update_connection_metrics(&self, stats: &PoolStats) {
      self.state.lock().connections = *stats;
   }

   pub fn record_query(&self, execution_time: Duration, success: bool) {
      let mut state = self.state.lock();
      state.queries.record(execution_time);
      if !success {
         state.failed_queries += 1;
      }
      if execution_time > SLOW_QUERY_THRESHOLD {
         state.slow_queries += 1;
         drop(state);
         debug!(
            elapsed_ms = execution_time.as_millis() as u64,
            "Slow query"
         );
      }
   }

   pub fn record_acquisition(&self, acquisition_time: Duration) {
      self.state.lock().acquisitions.record(acquisition_time);
   }

   /// Compute and store a new snapshot.
   pub fn collect_metrics(&self) -> MetricsSnapshot {
      let mut state = self.state.lock();
      let snapshot = Self::snapshot(&state);
      state.latest = Some(snapshot.clone());
      trace!(
         utilization = snapshot.connection_utilization,
         pending = snapshot.connections.pending,
         "Collected pool metrics"
      );
      snapshot
   }

   /// The most recent snapshot, if one has been collected.
   pub fn latest_snapshot(&self) -> Option<MetricsSnapshot> {
      self.state.lock().latest.clone()
   }

   fn snapshot(state: &CollectorState) -> MetricsSnapshot {
      let c = &state.connections;
      let failed_acquisitions = c.timeouts + c.errors;

      MetricsSnapshot {
         taken_at: OffsetDateTime::now_utc(),
         connections: *c,
         connection_utilization: c.utilization(),
         acquisition_error_rate: ratio(failed_acquisitions, c.acquisitions + failed_acquisitions),
         query_error_rate: ratio(state.failed_queries, state.queries.count),
         total_queries: state.queries.count,
         failed_queries: state.failed_queries,
         slow_queries: state.slow_queries,
         avg_query_ms: state.queries.avg_ms(),
         max_query_ms: state.queries.max_ms(),
         total_acquisitions: state.acquisitions.count,
         avg_acquisition_ms: state.acquisitions.avg_ms(),
         max_acquisition_ms: state.acquisitions.max_ms(),
      }
   }

   /// Evaluate every alert condition against the latest snapshot (collecting
   /// one first if none exists), publish the resulting events and return them.
   pub fn check_alerts(&self) -> Vec<AlertEvent> {
      let now = Instant::now();
      let mut events = Vec::new();

      {
         let mut state = self.state.lock();
         let snapshot = match &state.latest {
            Some(snapshot) => snapshot.clone(),
            None => {
               let snapshot = Self::snapshot(&state);
               state.latest = Some(snapshot.clone());
               snapshot
            }
         };

         for kind in AlertKind::ALL {
            let (triggered, value, threshold) = self.condition(kind, &snapshot);
            let Some(alert_state) = state.alerts.get_mut(&kind) else {
               continue;
            };

            match alert_state.evaluate(triggered, now, self.config.alert_cooldown) {
               Some(AlertTransition::Raise) => {
                  events.push(AlertEvent::Raised(Alert {
                     kind,
                     value,
                     threshold,
                     message: describe(kind, value, threshold),
                     occurrence: alert_state.occurrence_count,
                     raised_at: OffsetDateTime::now_utc(),
                  }));
               }
               Some(AlertTransition::Resolve) => {
                  events.push(AlertEvent::Resolved {
                     kind,
                     resolved_at: OffsetDateTime::now_utc(),
                  });
               }
               None => {}
            }
         }
      }

      for event in &events {
         match event {
            AlertEvent::Raised(alert) => warn!(
               alert = %alert.kind,
               value = alert.value,
               threshold = alert.threshold,
               occurrence = alert.occurrence,
               "{}",
               alert.message
            ),
            AlertEvent::Resolved { kind, .. } => info!(alert = %kind, "Pool alert resolved"),
         }
         // No subscribers is not an error
         let _ = self.alerts_tx.send(event.clone());
      }

      events
   }

   /// Returns (triggered, observed value, threshold) for one alert kind.
   fn condition(&self, kind: AlertKind, snapshot: &MetricsSnapshot) -> (bool, f64, f64) {
      let thresholds = &self.config.thresholds;
      let c = &snapshot.connections;

      match kind {
         AlertKind::HighUtilization => {
            let value = snapshot.connection_utilization;
            (value > thresholds.utilization, value, thresholds.utilization)
         }
         AlertKind::HighPendingRequests => (
            c.pending > thresholds.pending,
            c.pending as f64,
            thresholds.pending as f64,
         ),
         AlertKind::HighErrorRate => {
            let value = snapshot
               .acquisition_error_rate
               .max(snapshot.query_error_rate);
            (value > thresholds.error_rate, value, thresholds.error_rate)
         }
         AlertKind::PoolExhausted => (
            c.max_size > 0 && c.busy >= c.max_size && c.pending > 0,
            c.pending as f64,
            0.0,
         ),
      }
   }

   /// Alert kinds currently active.
   pub fn active_alerts(&self) -> Vec<AlertKind> {
      self.state.lock().active_kinds()
   }

   pub fn alert_state(&self, kind: AlertKind) -> AlertState {
      self
         .state
         .lock()
         .alerts
         .get(&kind)
         .copied()
         .unwrap_or_default()
   }

   /// Latest snapshot (collected now if none exists) plus active alerts.
   pub fn performance_report(&self) -> PerformanceReport {
      let snapshot = match self.latest_snapshot() {
         Some(snapshot) => snapshot,
         None => self.collect_metrics(),
      };

      PerformanceReport {
         snapshot,
         active_alerts: self.active_alerts(),
      }
   }

   /// Clear query and acquisition counters. Alert state is kept.
   pub fn reset(&self) {
      let mut state = self.state.lock();
      state.queries = Timings::default();
      state.failed_queries = 0;
      state.slow_queries = 0;
      state.acquisitions = Timings::default();
      state.latest = None;
   }

   pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
      self.alerts_tx.subscribe()
   }

   /// Subscribe and get a `Stream` limited to `kinds`, or every kind when
   /// `kinds` is empty.
   pub fn subscribe_stream<I>(&self, kinds: I) -> AlertStream
   where
      I: IntoIterator<Item = AlertKind>,
   {
      let state = Arc::downgrade(&self.state);
      AlertStream::new(self.alerts_tx.subscribe(), kinds.into_iter().collect(), move || {
         state
            .upgrade()
            .map(|state| state.lock().active_kinds())
            .unwrap_or_default()
      })
   }

   /// Spawn the collection and alert-check loops.
   ///
   /// The loops run until the returned task is stopped or dropped.
   pub fn start(self: &Arc<Self>) -> MetricsTask {
      let collector = Arc::clone(self);
      let collection = self.config.collection_interval;
      let alert_check = self.config.alert_check_interval;

      let handle = tokio::spawn(async move {
         let start = tokio::time::Instant::now();
         let mut collect_tick = tokio::time::interval_at(start + collection, collection);
         let mut alert_tick = tokio::time::interval_at(start + alert_check, alert_check);
         collect_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
         alert_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

         loop {
            tokio::select! {
               _ = collect_tick.tick() => {
                  collector.collect_metrics();
               }
               _ = alert_tick.tick() => {
                  collector.check_alerts();
               }
            }
         }
      });

      debug!(
         collection_ms = collection.as_millis() as u64,
         alert_check_ms = alert_check.as_millis() as u64,
         "Metrics collection started"
      );
      MetricsTask {
         handle: Some(handle),
      }
   }
}

impl PoolObserver for MetricsCollector {
   fn on_query(&self, elapsed: Duration, success: bool) {
      self.record_query(elapsed, success);
   }

   fn on_acquire(&self, waited: Duration) {
      self.record_acquisition(waited);
   }

   fn on_stats(&self, stats: &PoolStats) {
      self.update_connection_metrics(stats);
   }
}

fn describe(kind: AlertKind, value: f64, threshold: f64) -> String {
   match kind {
      AlertKind::HighUtilization => format!(
         "Connection utilization {:.1}% exceeds {:.1}%",
         value * 100.0,
         threshold * 100.0
      ),
      AlertKind::HighPendingRequests => {
         format!("{value} acquisitions pending, threshold {threshold}")
      }
      AlertKind::HighErrorRate => format!(
         "Error rate {:.2}% exceeds {:.2}%",
         value * 100.0,
         threshold * 100.0
      ),
      AlertKind::PoolExhausted => {
         format!("Pool exhausted with {value} acquisitions still queued")
      }
   }
}

/// Handle to the background collection loops.
#[must_use = "dropping the task stops metrics collection"]
pub struct MetricsTask {
   handle: Option<JoinHandle<()>>,
}

impl MetricsTask {
   pub fn stop(mut self) {
      if let Some(handle) = self.handle.take() {
         handle.abort();
      }
   }

   pub fn is_running(&self) -> bool {
      self.handle.as_ref().is_some_and(|h| !h.is_finished())
   }
}

impl Drop for MetricsTask {
   fn drop(&mut self) {
      if let Some(handle) = self.handle.take() {
         handle.abort();
      }
   }
}
