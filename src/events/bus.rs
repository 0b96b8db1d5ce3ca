//! Event bus for broadcasting chat notifications to observers

use super::{ChatNotification, NotificationEmitter};
use tokio::sync::broadcast;
use tracing::trace;

/// Notifications buffered per subscriber before it starts lagging
const DEFAULT_CAPACITY: usize = 1024;

/// Fans transcript and connection changes out to every UI observer.
///
/// `emit` only queues and never waits on a subscriber. With nobody
/// subscribed the notification is discarded; a slow subscriber sees
/// `Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChatNotification>,
}

impl EventBus {
    /// `capacity` bounds how far a subscriber may fall behind
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Observe notifications emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ChatNotification> {
        self.sender.subscribe()
    }

    /// How many observers are attached
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl NotificationEmitter for EventBus {
    fn emit(&self, notification: ChatNotification) {
        let kind = notification.notification_type();
        if let Ok(n) = self.sender.send(notification) {
            trace!(notification = kind, subscribers = n, "Notification emitted");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
