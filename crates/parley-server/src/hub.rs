use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use parley_core::errors::NotifyError;
use parley_core::events::{Notifier, Topic, TurnEvent};

/// In-process fan-out of serialized turn events, one broadcast channel per
/// topic. Channels are created on first subscribe and dropped once nobody
/// listens.
pub struct TopicHub {
    topics: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl TopicHub {
    /// `capacity` bounds how far a slow subscriber may lag before it starts
    /// missing events.
    pub fn new(capacity: usize) -> Self {
        Self { topics: DashMap::new(), capacity: capacity.max(1) }
    }

    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<String> {
        self.topics
            .entry(topic.as_str().to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic.as_str()).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Drop the channel for `topic` once its last receiver is gone. Returns
    /// whether it was removed.
    pub fn release(&self, topic: &Topic) -> bool {
        self.topics
            .remove_if(topic.as_str(), |_, tx| tx.receiver_count() == 0)
            .is_some()
    }
}

#[async_trait]
impl Notifier for TopicHub {
    async fn publish(&self, topic: &Topic, event: &TurnEvent) -> Result<(), NotifyError> {
        let json = serde_json::to_string(event)?;
        let delivered = match self.topics.get(topic.as_str()) {
            Some(tx) => tx.send(json).ok(),
            None => None,
        };
        match delivered {
            Some(receivers) => {
                trace!(%topic, receivers, event = event.kind(), "event published");
            }
            None => {
                let _ = self.release(topic);
                debug!(%topic, event = event.kind(), "no live subscribers");
            }
        }
        Ok(())
    }
}
