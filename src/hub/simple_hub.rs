use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::ChangeSource;
use super::HubMessage;
use super::Payload;
use super::Subscription;
use super::TopicMatcher;
use super::TXN_WATCHER_COLLECTION;
use super::TXN_WATCHER_RESTARTED;
use crate::Change;

struct Subscriber {
    matcher: TopicMatcher,
    sender: mpsc::UnboundedSender<HubMessage>,
}

#[derive(Default)]
struct HubInner {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

/// In-process topic hub.
///
/// Every subscriber gets its own unbounded queue, so a publisher never waits on
/// a slow subscriber. Cloning the hub shares the subscriber set.
#[derive(Clone, Default)]
pub struct SimpleHub {
    inner: Arc<HubInner>,
}

impl SimpleHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `payload` to every subscriber whose matcher accepts `topic`.
    ///
    /// Returns how many subscribers received the message.
    pub fn publish(
        &self,
        topic: &str,
        payload: Payload,
    ) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        let mut delivered = 0;

        subscribers.retain(|id, subscriber| {
            if !(subscriber.matcher)(topic) {
                return true;
            }
            let message = HubMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            match subscriber.sender.send(message) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    trace!(subscriber_id = id, "Pruning closed subscriber");
                    false
                }
            }
        });

        trace!(topic, delivered, "Message published");
        delivered
    }

    pub fn publish_change(
        &self,
        change: Change,
    ) -> usize {
        self.publish(TXN_WATCHER_COLLECTION, Payload::Change(change))
    }

    pub fn publish_restarted(&self) -> usize {
        self.publish(TXN_WATCHER_RESTARTED, Payload::Empty)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

fn remove_subscriber(
    hub: &Weak<HubInner>,
    id: u64,
) {
    if let Some(inner) = hub.upgrade() {
        inner.subscribers.lock().remove(&id);
        trace!(subscriber_id = id, "Unsubscribed");
    }
}

impl ChangeSource for SimpleHub {
    fn subscribe(
        &self,
        matcher: TopicMatcher,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        self.inner.subscribers.lock().insert(id, Subscriber { matcher, sender });
        trace!(subscriber_id = id, "Subscribed");

        let hub = Arc::downgrade(&self.inner);
        Subscription::new(receiver, move || remove_subscriber(&hub, id))
    }
}

impl std::fmt::Debug for SimpleHub {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SimpleHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
