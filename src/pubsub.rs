// Topic-based pub/sub with a pluggable backend.
//
// The in-process default fans out over tokio broadcast channels.  The topic
// map is read on every publish without locking (atomic pointer swap);
// subscribe rebuilds the map under a writer mutex.  Delivery guarantees:
// at-least-once within a process (a lagged subscriber observes a gap and
// logs it), best-effort across processes.  Ordering within a topic from a
// single publisher is preserved in-process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::broadcast;

/// Pending payloads per subscriber before overrun.
pub const TOPIC_CAPACITY: usize = 256;

type TopicMap = HashMap<String, broadcast::Sender<Vec<u8>>>;

/// Errors surfaced by a bus backend.
///
/// Publish failures are logged by the caller and never propagated to
/// subscribers, which proceed as if no event happened.
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("publish to topic {topic:?} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// The backend contract, sufficient for a cross-node implementation: move
/// opaque bytes from publishers to per-topic subscriber channels.
pub trait Backend: Send + Sync {
    /// Deliver `payload` to every current subscriber of `topic`.  Zero
    /// subscribers is a success.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PubSubError>;

    /// Open a receiver for future publishes on `topic`.  Dropping the
    /// receiver unsubscribes.
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>>;
}

/// In-process bus backend.
pub struct LocalBus {
    topics: ArcSwap<TopicMap>,
    // Guards map rebuilds; the publish path never takes it.
    write: Mutex<()>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            topics: ArcSwap::from_pointee(TopicMap::new()),
            write: Mutex::new(()),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .load()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for LocalBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PubSubError> {
        if let Some(tx) = self.topics.load().get(topic) {
            // Err means every receiver is gone; treat like an empty topic.
            let _ = tx.send(payload);
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Vec<u8>> {
        let guard = self.write.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(tx) = self.topics.load().get(topic) {
            return tx.subscribe();
        }

        let (tx, rx) = broadcast::channel(TOPIC_CAPACITY);
        let mut rebuilt: TopicMap = self
            .topics
            .load()
            .iter()
            .filter(|(_, sender)| sender.receiver_count() > 0)
            .map(|(name, sender)| (name.clone(), sender.clone()))
            .collect();
        rebuilt.insert(topic.to_owned(), tx);
        self.topics.store(Arc::new(rebuilt));

        drop(guard);
        rx
    }
}
