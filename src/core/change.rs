use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;

/// Revision number recorded for documents that do not exist (or were removed).
pub const REVNO_MISSING: i64 = -1;

/// Predicate over document ids used to pre-filter collection watches.
pub type IdFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Sending half of a watcher's private notification channel.
pub type NotificationSender = mpsc::Sender<Notification>;

/// Subject of interest: either one document or a whole collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchKey {
    pub collection: String,
    /// `None` means every document in `collection`
    pub id: Option<String>,
}

impl WatchKey {
    pub fn document(
        collection: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: Some(id.into()),
        }
    }

    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: None,
        }
    }

    pub fn is_collection(&self) -> bool {
        self.id.is_none()
    }

    /// A collection key matches every document key of the same collection.
    pub fn matches(
        &self,
        other: &WatchKey,
    ) -> bool {
        if self.collection != other.collection {
            return false;
        }
        match (&self.id, &other.id) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => a == b,
        }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}/{}", self.collection, id),
            None => write!(f, "{}/*", self.collection),
        }
    }
}

/// One observed document mutation from the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub collection: String,
    pub id: String,
    pub revno: i64,
    pub deleted: bool,
}

impl Change {
    pub fn new(
        collection: impl Into<String>,
        id: impl Into<String>,
        revno: i64,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            revno,
            deleted: false,
        }
    }

    pub fn removed(
        collection: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            revno: REVNO_MISSING,
            deleted: true,
        }
    }

    pub fn key(&self) -> WatchKey {
        WatchKey::document(self.collection.clone(), self.id.clone())
    }

    /// Revision remembered for this change; removals are recorded as missing
    /// so that re-creating the same id is seen as new state.
    pub(crate) fn tracked_revno(&self) -> i64 {
        if self.deleted {
            REVNO_MISSING
        } else {
            self.revno
        }
    }
}

/// What a watcher receives on its channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub key: WatchKey,
    pub revno: i64,
    pub deleted: bool,
}

impl Notification {
    pub fn collection(&self) -> &str {
        &self.key.collection
    }

    pub fn id(&self) -> Option<&str> {
        self.key.id.as_deref()
    }
}
