use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::Event;

/// A live subscription to one trigger's events.
///
/// Yields events in publish order and ends after `PipelineClosed`, when its
/// token is cancelled, or once the memory is purged. Ending drops the
/// receiver, so the subscriber count goes down immediately.
pub struct EventSubscription {
  trigger_id: String,
  receiver: Option<broadcast::Receiver<Event>>,
  cancel: CancellationToken,
}

impl EventSubscription {
  pub(crate) fn new(
    trigger_id: &str,
    receiver: broadcast::Receiver<Event>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      trigger_id: trigger_id.to_string(),
      receiver: Some(receiver),
      cancel,
    }
  }

  /// The next event, or `None` once the subscription has ended.
  pub async fn next(&mut self) -> Option<Event> {
    loop {
      let receiver = self.receiver.as_mut()?;
      let received = tokio::select! {
        biased;
        _ = self.cancel.cancelled() => {
          debug!(trigger_id = %self.trigger_id, "event_subscription_cancelled");
          self.receiver = None;
          return None;
        }
        received = receiver.recv() => received,
      };

      match received {
        Ok(event) => {
          if event.is_closed() {
            self.receiver = None;
          }
          return Some(event);
        }
        Err(RecvError::Lagged(skipped)) => {
          warn!(trigger_id = %self.trigger_id, skipped, "event_subscriber_lagged");
        }
        Err(RecvError::Closed) => {
          self.receiver = None;
          return None;
        }
      }
    }
  }

  /// Whether the subscription can still yield events.
  pub fn is_active(&self) -> bool {
    self.receiver.is_some()
  }

  /// Stop listening and release the receiver.
  pub fn close(&mut self) {
    self.receiver = None;
  }

  pub fn into_stream(self) -> impl Stream<Item = Event> + Send {
    futures::stream::unfold(self, |mut subscription| async move {
      let event = subscription.next().await?;
      Some((event, subscription))
    })
  }
}

impl std::fmt::Debug for EventSubscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EventSubscription")
      .field("trigger_id", &self.trigger_id)
      .field("active", &self.is_active())
      .finish()
  }
}
