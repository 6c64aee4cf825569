//! Alert events as a `Stream`

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::alert::{AlertEvent, AlertKind};

/// Item yielded by an [`AlertStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum AlertStreamEvent {
   Alert(AlertEvent),
   /// The subscriber fell behind and `missed` events were dropped.
   ///
   /// Raise/resolve pairs may be among them, so `active` carries the watched
   /// kinds that were active when the gap was noticed.
   Lagged { missed: u64, active: Vec<AlertKind> },
}

/// Alert events for the kinds a subscriber watches.
///
/// Obtained from
/// [`MetricsCollector::subscribe_stream`](crate::MetricsCollector::subscribe_stream).
pub struct AlertStream {
   inner: Pin<Box<dyn Stream<Item = AlertStreamEvent> + Send>>,
}

impl AlertStream {
   /// `kinds` empty watches every kind. `active` reports the collector's
   /// currently active kinds.
   pub(crate) fn new<F>(rx: broadcast::Receiver<AlertEvent>, kinds: Vec<AlertKind>, active: F) -> Self
   where
      F: Fn() -> Vec<AlertKind> + Send + 'static,
   {
      let watches = move |kind: AlertKind| kinds.is_empty() || kinds.contains(&kind);

      let inner = BroadcastStream::new(rx).filter_map(move |item| match item {
         Ok(event) => watches(event.kind()).then_some(AlertStreamEvent::Alert(event)),
         Err(BroadcastStreamRecvError::Lagged(missed)) => {
            let active: Vec<AlertKind> = active().into_iter().filter(|k| watches(*k)).collect();
            warn!(
               missed,
               ?active,
               "Alert subscriber lagged; consider increasing channel_capacity"
            );
            Some(AlertStreamEvent::Lagged { missed, active })
         }
      });

      Self {
         inner: Box::pin(inner),
      }
   }
}

impl Stream for AlertStream {
   type Item = AlertStreamEvent;

   fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
      self.inner.as_mut().poll_next(cx)
   }
}
