use tokio::sync::oneshot;

use super::IdFilter;
use super::Notification;
use super::NotificationSender;
use super::Stats;
use super::WatchKey;
use crate::RegistrationViolation;

pub(crate) type WatchId = u64;

/// Requests serviced by the dispatcher loop, each with its own reply channel.
pub(crate) enum WatcherRequest {
    Watch {
        key: WatchKey,
        sender: NotificationSender,
        filter: Option<IdFilter>,
        reply: oneshot::Sender<std::result::Result<(), RegistrationViolation>>,
    },

    /// Document interest in several ids of one collection, registered atomically
    WatchMulti {
        collection: String,
        ids: Vec<String>,
        sender: NotificationSender,
        reply: oneshot::Sender<std::result::Result<(), RegistrationViolation>>,
    },

    Unwatch {
        key: WatchKey,
        sender: NotificationSender,
        reply: oneshot::Sender<std::result::Result<(), RegistrationViolation>>,
    },

    Stats {
        reply: oneshot::Sender<Stats>,
    },
}

impl std::fmt::Debug for WatcherRequest {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            WatcherRequest::Watch { key, filter, .. } => f
                .debug_struct("Watch")
                .field("key", key)
                .field("filtered", &filter.is_some())
                .finish_non_exhaustive(),
            WatcherRequest::WatchMulti { collection, ids, .. } => f
                .debug_struct("WatchMulti")
                .field("collection", collection)
                .field("ids", ids)
                .finish_non_exhaustive(),
            WatcherRequest::Unwatch { key, .. } => f.debug_struct("Unwatch").field("key", key).finish_non_exhaustive(),
            WatcherRequest::Stats { .. } => f.write_str("Stats"),
        }
    }
}

/// A registration held in the dispatcher's registry.
pub(crate) struct WatchInfo {
    pub(crate) id: WatchId,
    pub(crate) sender: NotificationSender,
    pub(crate) filter: Option<IdFilter>,
}

impl WatchInfo {
    pub(crate) fn accepts(
        &self,
        doc_id: &str,
    ) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(doc_id))
    }
}

/// A notification waiting for its consumer to accept it.
///
/// The event is tombstoned implicitly once `watch_id` is no longer live.
#[derive(Debug)]
pub(crate) struct PendingEvent {
    pub(crate) watch_id: WatchId,
    pub(crate) sender: NotificationSender,
    pub(crate) key: WatchKey,
    pub(crate) revno: i64,
    pub(crate) deleted: bool,
}

impl PendingEvent {
    pub(crate) fn notification(&self) -> Notification {
        Notification {
            key: self.key.clone(),
            revno: self.revno,
            deleted: self.deleted,
        }
    }
}
