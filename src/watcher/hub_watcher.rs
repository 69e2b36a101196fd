use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use super::WatcherState;
use crate::hub::match_all;
use crate::hub::ChangeSource;
use crate::Dispatcher;
use crate::DispatcherConfig;
use crate::DispatcherError;
use crate::Error;
use crate::IdFilter;
use crate::NotificationSender;
use crate::RegistrationViolation;
use crate::Result;
use crate::Stats;
use crate::WatchKey;
use crate::WatcherRequest;

/// Handle to a running hub watcher.
///
/// Cloning is cheap; all clones talk to the same dispatcher loop. The loop
/// stops when [`HubWatcher::kill`] is called, when the change source fails, or
/// when the last handle is dropped.
///
/// # Panics
///
/// Contract violations (watching a key twice on one channel, unwatching a key
/// that is not watched) panic in the calling task, after the dispatcher has
/// replied. The watcher keeps running. When the caller is a spawned task the
/// panic only surfaces through that task's [`JoinHandle`](tokio::task::JoinHandle),
/// so callers that spawn registrations should await the handle.
///
/// # Example
///
/// ```ignore
/// let hub = SimpleHub::new();
/// let watcher = HubWatcher::new(&hub, DispatcherConfig::default());
///
/// let (tx, mut rx) = tokio::sync::mpsc::channel(16);
/// watcher.watch("machines", "uuid:0", tx.clone()).await?;
///
/// hub.publish_change(Change::new("machines", "uuid:0", 3));
/// let initial = rx.recv().await;   // synthetic, sent at registration
/// let changed = rx.recv().await;   // revno 3
///
/// watcher.unwatch("machines", "uuid:0", &tx).await?;
/// watcher.kill();
/// watcher.wait().await?;
/// ```
#[derive(Clone)]
pub struct HubWatcher {
    name: Arc<str>,
    request_tx: mpsc::Sender<WatcherRequest>,
    state: Arc<watch::Sender<WatcherState>>,
    cancel: CancellationToken,
}

impl HubWatcher {
    /// Subscribes to `source` and starts the dispatcher loop.
    ///
    /// The subscription is taken before this returns, so every change published
    /// afterwards is seen by the loop. Must be called within a tokio runtime.
    pub fn new<S>(
        source: &S,
        config: DispatcherConfig,
    ) -> Self
    where
        S: ChangeSource + ?Sized,
    {
        let subscription = source.subscribe(match_all());
        let (request_tx, request_rx) = mpsc::channel(config.request_channel_size);
        let cancel = CancellationToken::new();
        let (state_tx, _) = watch::channel(WatcherState::Running);
        let state = Arc::new(state_tx);

        let dispatcher = Dispatcher::new(&config, subscription, request_rx, cancel.clone());
        tokio::spawn(supervise(dispatcher, state.clone(), cancel.clone()));

        Self {
            name: Arc::from(config.name),
            request_tx,
            state,
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Watches one document. The channel receives an initial notification
    /// carrying the last known revno, then one per change of the document.
    ///
    /// # Panics
    ///
    /// Panics if `sender` already watches this document.
    pub async fn watch(
        &self,
        collection: impl Into<String>,
        id: impl Into<String>,
        sender: NotificationSender,
    ) -> Result<()> {
        let key = WatchKey::document(collection, id);
        self.add_watch(key, sender, None).await
    }

    /// Watches every document of a collection.
    ///
    /// # Panics
    ///
    /// Panics if `sender` already watches this collection.
    pub async fn watch_collection(
        &self,
        collection: impl Into<String>,
        sender: NotificationSender,
    ) -> Result<()> {
        self.add_watch(WatchKey::collection(collection), sender, None).await
    }

    /// Watches the documents of a collection whose id satisfies `filter`.
    ///
    /// The filter runs on the dispatcher task and must be cheap.
    pub async fn watch_collection_filtered<F>(
        &self,
        collection: impl Into<String>,
        sender: NotificationSender,
        filter: F,
    ) -> Result<()>
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let filter: IdFilter = Arc::new(filter);
        self.add_watch(WatchKey::collection(collection), sender, Some(filter))
            .await
    }

    /// Watches several documents of one collection on the same channel.
    ///
    /// Either every id is registered or none is. Each id gets its own initial
    /// notification and must later be unwatched individually.
    pub async fn watch_multi<I, T>(
        &self,
        collection: impl Into<String>,
        ids: I,
        sender: NotificationSender,
    ) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let collection = collection.into();
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();

        if ids.is_empty() {
            return Err(Error::InvalidArgument(format!("no ids given to watch in {collection}")));
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(duplicate) = ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(Error::InvalidArgument(format!(
                "id {duplicate:?} given twice to watch in {collection}"
            )));
        }

        let result = self
            .request(|reply| WatcherRequest::WatchMulti {
                collection,
                ids,
                sender,
                reply,
            })
            .await?;
        enforce(result);
        Ok(())
    }

    /// Stops watching one document. Events already queued for this
    /// registration are discarded.
    ///
    /// # Panics
    ///
    /// Panics if `sender` does not watch this document.
    pub async fn unwatch(
        &self,
        collection: impl Into<String>,
        id: impl Into<String>,
        sender: &NotificationSender,
    ) -> Result<()> {
        self.remove_watch(WatchKey::document(collection, id), sender).await
    }

    /// Stops watching a collection.
    ///
    /// # Panics
    ///
    /// Panics if `sender` does not watch this collection.
    pub async fn unwatch_collection(
        &self,
        collection: impl Into<String>,
        sender: &NotificationSender,
    ) -> Result<()> {
        self.remove_watch(WatchKey::collection(collection), sender).await
    }

    /// Current counters and queue sizes, or empty stats once the watcher is
    /// no longer running.
    pub async fn stats(&self) -> Stats {
        self.request(|reply| WatcherRequest::Stats { reply })
            .await
            .unwrap_or_default()
    }

    /// Asks the loop to stop. Queued events are discarded.
    pub fn kill(&self) {
        let dying = self.state.send_if_modified(|state| {
            if state.is_running() {
                *state = WatcherState::Dying;
                true
            } else {
                false
            }
        });
        if dying {
            debug!(watcher = %self.name, "Hub watcher killed");
        }
        self.cancel.cancel();
    }

    /// Waits for the loop to exit and returns its terminal error, `Ok(())` for
    /// a clean stop.
    pub async fn wait(&self) -> Result<()> {
        let mut state_rx = self.state.subscribe();
        let terminal = match state_rx.wait_for(WatcherState::is_dead).await {
            Ok(state) => state.clone(),
            Err(_) => return Err(Error::Stopped),
        };

        match terminal {
            WatcherState::Dead(Some(e)) => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Resolves once the watcher is dead.
    pub fn dead(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut state_rx = self.state.subscribe();
        async move {
            let _ = state_rx.wait_for(WatcherState::is_dead).await;
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state.borrow().clone()
    }

    async fn add_watch(
        &self,
        key: WatchKey,
        sender: NotificationSender,
        filter: Option<IdFilter>,
    ) -> Result<()> {
        let result = self
            .request(|reply| WatcherRequest::Watch {
                key,
                sender,
                filter,
                reply,
            })
            .await?;
        enforce(result);
        Ok(())
    }

    async fn remove_watch(
        &self,
        key: WatchKey,
        sender: &NotificationSender,
    ) -> Result<()> {
        let sender = sender.clone();
        let result = self
            .request(|reply| WatcherRequest::Unwatch { key, sender, reply })
            .await?;
        enforce(result);
        Ok(())
    }

    /// Sends a request to the loop and waits for its reply.
    ///
    /// Resolves to `Error::Stopped` instead of hanging when the loop is dying
    /// or already gone.
    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> WatcherRequest,
    ) -> Result<R> {
        if !self.state.borrow().is_running() {
            return Err(Error::Stopped);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::Stopped)?;
        reply_rx.await.map_err(|_| Error::Stopped)
    }
}

impl std::fmt::Debug for HubWatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HubWatcher")
            .field("name", &self.name)
            .field("state", &self.state.borrow().as_str())
            .finish()
    }
}

/// Contract violations are caller bugs: fail loudly in the caller's task.
fn enforce(result: std::result::Result<(), RegistrationViolation>) {
    if let Err(violation) = result {
        panic!("hub watcher contract violation: {violation}");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs the loop to completion and publishes the terminal state.
async fn supervise(
    dispatcher: Dispatcher,
    state: Arc<watch::Sender<WatcherState>>,
    cancel: CancellationToken,
) {
    let result = AssertUnwindSafe(dispatcher.run())
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(DispatcherError::Panicked(panic_message(panic.as_ref()))));

    cancel.cancel();
    state.send_if_modified(|state| {
        if state.is_running() {
            *state = WatcherState::Dying;
            true
        } else {
            false
        }
    });

    let error = result.err();
    info!(error = ?error, "Hub watcher dead");
    state.send_replace(WatcherState::Dead(error));
}
