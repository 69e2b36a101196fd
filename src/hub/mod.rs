//! Change source contract and an in-process topic hub implementing it
//!
//! The transaction log follower publishes every document mutation on
//! [`TXN_WATCHER_COLLECTION`] and a [`TXN_WATCHER_RESTARTED`] message whenever it
//! lost its place in the log. Consumers subscribe with a topic matcher and read
//! messages from their [`Subscription`].
//!
//! ```text
//! txn log follower ──publish──▶ SimpleHub ──▶ Subscription (per subscriber)
//!                                                │
//!                                                ▼
//!                                          HubWatcher loop
//! ```

mod simple_hub;

#[cfg(test)]
mod simple_hub_test;

pub use simple_hub::*;

use tokio::sync::mpsc;

use crate::Change;

/// Topic for a single document change, payload [`Payload::Change`].
pub const TXN_WATCHER_COLLECTION: &str = "txnwatcher.collection";

/// Topic signalling the log was restarted, no payload.
pub const TXN_WATCHER_RESTARTED: &str = "txnwatcher.restarted";

/// Decides which topics a subscriber receives.
pub type TopicMatcher = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Matcher accepting every topic.
pub fn match_all() -> TopicMatcher {
    Box::new(|_| true)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Empty,
    Change(Change),
    Raw(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Change(_) => "change",
            Payload::Raw(_) => "raw",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubMessage {
    pub topic: String,
    pub payload: Payload,
}

/// Source of document changes consumed by the hub watcher.
#[cfg_attr(test, mockall::automock)]
pub trait ChangeSource: Send + Sync {
    /// Registers a subscriber for every topic accepted by `matcher`.
    ///
    /// Messages start flowing as soon as this returns.
    fn subscribe(
        &self,
        matcher: TopicMatcher,
    ) -> Subscription;
}

/// Receiving end of a change source subscription.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<HubMessage>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<HubMessage>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Next message, or `None` once the source dropped this subscriber.
    pub async fn recv(&mut self) -> Option<HubMessage> {
        self.receiver.recv().await
    }

    /// Stops delivery. Calling it more than once is a no-op.
    pub fn unsubscribe(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
        self.receiver.close();
    }

    pub fn is_subscribed(&self) -> bool {
        self.unsubscribe.is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subscribed", &self.is_subscribed())
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
