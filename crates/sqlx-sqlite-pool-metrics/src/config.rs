use std::time::Duration;

use crate::{Error, Result};

/// Numeric limits that raise alerts when exceeded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
   /// Busy / total connections above which `HighUtilization` fires.
   ///
   /// Default: 0.8
   pub utilization: f64,
   /// Queued acquires above which `HighPendingRequests` fires.
   ///
   /// Default: 10
   pub pending: usize,
   /// Acquisition or query error rate above which `HighErrorRate` fires.
   ///
   /// Default: 0.05
   pub error_rate: f64,
}

impl Default for AlertThresholds {
   fn default() -> Self {
      Self {
         utilization: 0.8,
         pending: 10,
         error_rate: 0.05,
      }
   }
}

/// Configuration for a [`MetricsCollector`](crate::MetricsCollector).
#[derive(Debug, Clone)]
pub struct MetricsConfig {
   /// Interval between snapshots taken by the background task.
   ///
   /// Default: 10 seconds
   pub collection_interval: Duration,
   /// Interval between alert evaluations by the background task.
   ///
   /// Default: 30 seconds
   pub alert_check_interval: Duration,
   /// Minimum time between repeated alerts of the same kind.
   ///
   /// Default: 5 minutes
   pub alert_cooldown: Duration,
   pub thresholds: AlertThresholds,
   /// Capacity of the alert broadcast channel. Subscribers that fall further
   /// behind than this see a lag notification.
   ///
   /// Default: 64
   pub channel_capacity: usize,
}

impl Default for MetricsConfig {
   fn default() -> Self {
      Self {
         collection_interval: Duration::from_secs(10),
         alert_check_interval: Duration::from_secs(30),
         alert_cooldown: Duration::from_secs(300),
         thresholds: AlertThresholds::default(),
         channel_capacity: 64,
      }
   }
}

impl MetricsConfig {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_collection_interval(mut self, interval: Duration) -> Self {
      self.collection_interval = interval;
      self
   }

   pub fn with_alert_check_interval(mut self, interval: Duration) -> Self {
      self.alert_check_interval = interval;
      self
   }

   pub fn with_alert_cooldown(mut self, cooldown: Duration) -> Self {
      self.alert_cooldown = cooldown;
      self
   }

   pub fn with_thresholds(mut self, thresholds: AlertThresholds) -> Self {
      self.thresholds = thresholds;
      self
   }

   pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
      self.channel_capacity = capacity;
      self
   }

   pub fn validate(&self) -> Result<()> {
      if self.collection_interval.is_zero() || self.alert_check_interval.is_zero() {
         return Err(Error::InvalidConfig(
            "collection and alert check intervals must be greater than zero".into(),
         ));
      }
      if self.channel_capacity == 0 {
         return Err(Error::InvalidConfig(
            "channel_capacity must be greater than zero".into(),
         ));
      }
      let ratio = 0.0..=1.0;
      if !ratio.contains(&self.thresholds.utilization) || !ratio.contains(&self.thresholds.error_rate)
      {
         return Err(Error::InvalidConfig(
            "utilization and error rate thresholds must be between 0 and 1".into(),
         ));
      }
      Ok(())
   }
}
