//! Update notifications
//!
//! Every committed mutation is published on a `tokio::sync::broadcast`
//! channel. Publishing never blocks the writer: with no subscribers the
//! update is dropped, and a subscriber that falls more than the channel
//! capacity behind loses the oldest updates and is told how many.

use std::sync::Arc;

use tessera_core::{Change, Key, Values, Version};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{trace, warn};

use crate::store::ModelId;

/// One committed mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Row added
    Addition {
        /// Model of the row
        model: ModelId,
        /// Row key
        key: Key,
        /// Commit version
        version: Version,
        /// Values as written
        values: Values,
    },
    /// Row changed
    Change {
        /// Model of the row
        model: ModelId,
        /// Row key
        key: Key,
        /// Commit version
        version: Version,
        /// Applied changes followed by their echoes
        changes: Vec<Change>,
    },
    /// Row deleted
    Removal {
        /// Model of the row
        model: ModelId,
        /// Row key
        key: Key,
        /// Commit version
        version: Version,
        /// Whether the row was removed from storage
        hard: bool,
    },
}

impl Update {
    /// Key of the affected row
    pub fn key(&self) -> &Key {
        match self {
            Update::Addition { key, .. } | Update::Change { key, .. } | Update::Removal { key, .. } => {
                key
            }
        }
    }

    /// Commit version
    pub fn version(&self) -> Version {
        match self {
            Update::Addition { version, .. }
            | Update::Change { version, .. }
            | Update::Removal { version, .. } => *version,
        }
    }
}

/// Sending side of the update channel
#[derive(Debug, Clone)]
pub struct UpdateChannel {
    sender: broadcast::Sender<Arc<Update>>,
}

impl UpdateChannel {
    /// Channel buffering up to `capacity` updates per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        UpdateChannel { sender }
    }

    /// Publish an update to every current subscriber
    pub fn publish(&self, update: Update) {
        let version = update.version();
        match self.sender.send(Arc::new(update)) {
            Ok(receivers) => {
                trace!(target: "tessera::store", %version, receivers, "published update")
            }
            Err(_) => trace!(target: "tessera::store", %version, "no subscribers for update"),
        }
    }

    /// New subscription receiving updates published from now on
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            dropped: 0,
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving side of the update channel
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<Arc<Update>>,
    dropped: u64,
}

impl Subscription {
    /// Wait for the next update; `None` once the store is dropped
    pub async fn recv(&mut self) -> Option<Arc<Update>> {
        loop {
            match self.receiver.recv().await {
                Ok(update) => return Some(update),
                Err(RecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered update without waiting
    pub fn try_recv(&mut self) -> Option<Arc<Update>> {
        loop {
            match self.receiver.try_recv() {
                Ok(update) => return Some(update),
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Updates lost because this subscription fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn lagged(&mut self, skipped: u64) {
        self.dropped += skipped;
        warn!(
            target: "tessera::store",
            skipped,
            total = self.dropped,
            "subscription lagged, updates dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removal(n: u64) -> Update {
        Update::Removal {
            model: ModelId(1),
            key: Key::new(vec![0, n as u8]),
            version: Version::new(n, 0),
            hard: false,
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let channel = UpdateChannel::new(4);
        channel.publish(removal(1));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn test_subscription_receives_in_order() {
        let channel = UpdateChannel::new(4);
        let mut sub = channel.subscribe();
        channel.publish(removal(1));
        channel.publish(removal(2));
        assert_eq!(sub.try_recv().unwrap().version(), Version::new(1, 0));
        assert_eq!(sub.try_recv().unwrap().version(), Version::new(2, 0));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_lagging_subscription_counts_dropped() {
        let channel = UpdateChannel::new(2);
        let mut sub = channel.subscribe();
        for n in 1..=5 {
            channel.publish(removal(n));
        }
        let first = sub.try_recv().unwrap();
        assert_eq!(first.version(), Version::new(4, 0));
        assert_eq!(sub.dropped(), 3);
    }

    #[tokio::test]
    async fn test_recv_ends_when_channel_dropped() {
        let channel = UpdateChannel::new(2);
        let mut sub = channel.subscribe();
        channel.publish(removal(1));
        drop(channel);
        assert_eq!(sub.recv().await.unwrap().key(), &Key::new(vec![0, 1]));
        assert!(sub.recv().await.is_none());
    }
}
