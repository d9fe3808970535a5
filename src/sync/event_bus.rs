//! Lifecycle events published by the sync orchestrator.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::{sync::DrainReport, user::UserId};

const DEFAULT_CAPACITY: usize = 64;

/// Something that happened during a drain.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A drain started for the user.
    Started {
        /// The user whose queue is being drained.
        user_id: UserId,
    },
    /// A drain finished. Individual operations may still have failed.
    Completed {
        /// The user whose queue was drained.
        user_id: UserId,
        /// What happened to the operations in the queue.
        report: DrainReport,
    },
    /// A drain stopped early because of an error in the local store.
    Failed {
        /// The user whose queue was being drained.
        user_id: UserId,
        /// A description of the error.
        message: String,
    },
}

/// Broadcasts [SyncEvent]s to every subscriber.
#[derive(Debug, Clone)]
pub struct SyncEventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl SyncEventBus {
    /// Create an event bus that buffers up to `capacity` events for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Start receiving events published from now on.
    pub fn subscribe(&self) -> SyncSubscription {
        SyncSubscription {
            receiver: Some(self.sender.subscribe()),
        }
    }

    /// Send `event` to the current subscribers. Returns how many received it.
    pub fn publish(&self, event: SyncEvent) -> usize {
        tracing::trace!(?event, "Publishing sync event");
        self.sender.send(event).unwrap_or(0)
    }

    /// The number of subscriptions that have not been dropped or unsubscribed.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SyncEventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

/// A handle for receiving [SyncEvent]s.
///
/// Events stop arriving once [SyncSubscription::unsubscribe] is called or the
/// handle is dropped.
#[derive(Debug)]
pub struct SyncSubscription {
    receiver: Option<broadcast::Receiver<SyncEvent>>,
}

impl SyncSubscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once unsubscribed or when the bus is gone. Events missed
    /// because the subscriber fell behind are skipped.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        let receiver = self.receiver.as_mut()?;

        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Sync subscriber missed {skipped} events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Get the next event if one is waiting.
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        let receiver = self.receiver.as_mut()?;

        loop {
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Stop receiving events.
    pub fn unsubscribe(&mut self) {
        self.receiver = None;
    }

    /// Whether [SyncSubscription::unsubscribe] has been called.
    pub fn is_unsubscribed(&self) -> bool {
        self.receiver.is_none()
    }
}

#[cfg(test)]
mod tests {
    use crate::sync::DrainReport;

    use super::{SyncEvent, SyncEventBus};

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = SyncEventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let received = bus.publish(SyncEvent::Started { user_id: 1 });

        assert_eq!(received, 2);
        assert_eq!(first.recv().await, Some(SyncEvent::Started { user_id: 1 }));
        assert_eq!(second.try_recv(), Some(SyncEvent::Started { user_id: 1 }));
    }

    #[test]
    fn unsubscribed_handle_receives_nothing() {
        let bus = SyncEventBus::default();
        let mut subscription = bus.subscribe();

        subscription.unsubscribe();
        let received = bus.publish(SyncEvent::Completed {
            user_id: 1,
            report: DrainReport::default(),
        });

        assert_eq!(received, 0);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(subscription.is_unsubscribed());
        assert_eq!(subscription.try_recv(), None);
    }

    #[test]
    fn publish_without_subscribers_is_ignored() {
        let bus = SyncEventBus::default();

        assert_eq!(
            bus.publish(SyncEvent::Failed {
                user_id: 1,
                message: "locked".to_owned()
            }),
            0
        );
    }

    #[test]
    fn lagging_subscriber_skips_to_retained_events() {
        let bus = SyncEventBus::with_capacity(1);
        let mut subscription = bus.subscribe();

        bus.publish(SyncEvent::Started { user_id: 1 });
        bus.publish(SyncEvent::Started { user_id: 2 });

        assert_eq!(subscription.try_recv(), Some(SyncEvent::Started { user_id: 2 }));
    }
}
