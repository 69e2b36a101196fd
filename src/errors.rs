//! Hub Watcher Error Hierarchy
//!
//! Errors fall into three groups:
//! - fatal loop failures ([`DispatcherError`]), reported by `HubWatcher::wait`
//! - transient results of racing with shutdown ([`Error::Stopped`])
//! - caller contract violations ([`RegistrationViolation`]), which are never returned
//!   as values; the calling task panics with them

use config::ConfigError;

use crate::WatchKey;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The dispatcher loop terminated with a fatal error
    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),

    /// The request raced with shutdown and was not serviced
    #[error("Hub watcher is stopped")]
    Stopped,

    /// Rejected request arguments (nothing was registered)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration load or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Metric registration failures
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),

    /// The `/metrics` endpoint could not be bound
    #[error("Metrics server failed: {0}")]
    MetricsServer(#[from] warp::Error),
}

/// Reasons the dispatcher loop stops by itself.
///
/// Every one of these is terminal: the supervisor is expected to build a fresh
/// `HubWatcher` rather than repair the current one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatcherError {
    /// The transaction log restarted, changes may have been missed
    #[error("change source restarted")]
    SourceRestarted,

    /// The change source published something other than a change on the collection topic
    #[error("unexpected {kind} payload on topic {topic:?}")]
    UnexpectedPayload { topic: String, kind: &'static str },

    /// The change source dropped our subscription
    #[error("change source subscription closed")]
    SourceClosed,

    /// The loop task panicked
    #[error("dispatcher panicked: {0}")]
    Panicked(String),
}

/// Caller bugs detected by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationViolation {
    #[error("channel already watching {0}")]
    DuplicateWatch(WatchKey),

    #[error("channel not watching {0}")]
    UnknownWatch(WatchKey),
}
