//! The hub watcher's event loop.
//!
//! A single task owns the registry, both event queues, the revno tracker and the
//! counters. Everything else talks to it through [`WatcherRequest`]s.
//!
//! ```text
//!  Subscription ──change──┐
//!                         ▼
//!  WatcherRequest ──▶ Dispatcher::run ──▶ sync queue ────┐
//!                         │                              ├──▶ watcher channels
//!                         └─────────────▶ request queue ─┘
//! ```
//!
//! Delivering one event never blocks ingestion: while a consumer is not ready,
//! the loop keeps folding new changes and requests into its state.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::Change;
use super::IdFilter;
use super::LoopCounters;
use super::NotificationSender;
use super::PendingEvent;
use super::RevnoTracker;
use super::Stats;
use super::WatchId;
use super::WatchInfo;
use super::WatchKey;
use super::WatcherRequest;
use super::REVNO_MISSING;
use crate::hub::HubMessage;
use crate::hub::Payload;
use crate::hub::Subscription;
use crate::hub::TXN_WATCHER_COLLECTION;
use crate::hub::TXN_WATCHER_RESTARTED;
use crate::DispatcherConfig;
use crate::DispatcherError;
use crate::RegistrationViolation;

/// Why a wait inside the loop ended.
enum Step {
    Continue,
    Stop,
}

pub(crate) struct Dispatcher {
    name: String,

    subscription: Subscription,
    request_rx: mpsc::Receiver<WatcherRequest>,
    cancel: CancellationToken,

    tracker: RevnoTracker,
    watches: HashMap<WatchKey, Vec<WatchInfo>>,
    /// Ids of registrations still in `watches`; queued events of any other id are tombstones
    live: HashSet<WatchId>,
    next_watch_id: WatchId,

    sync_events: VecDeque<PendingEvent>,
    request_events: VecDeque<PendingEvent>,
    /// Registrations with events still in `request_events`, and how many.
    /// Their changes queue behind those events to keep per-channel order.
    request_backlog: HashMap<WatchId, usize>,

    counters: LoopCounters,
}

impl Dispatcher {
    pub(crate) fn new(
        config: &DispatcherConfig,
        subscription: Subscription,
        request_rx: mpsc::Receiver<WatcherRequest>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: config.name.clone(),
            subscription,
            request_rx,
            cancel,
            tracker: RevnoTracker::new(),
            watches: HashMap::new(),
            live: HashSet::new(),
            next_watch_id: 1,
            sync_events: VecDeque::with_capacity(config.initial_queue_capacity),
            request_events: VecDeque::with_capacity(config.initial_queue_capacity),
            request_backlog: HashMap::new(),
            counters: LoopCounters::new(config.sync_len_ewma_weight),
        }
    }

    /// Runs until cancelled, until every handle is gone, or until the change
    /// source fails. The subscription is cancelled before this returns.
    pub(crate) async fn run(mut self) -> std::result::Result<(), DispatcherError> {
        info!(watcher = %self.name, "Hub watcher started");

        let result = self.event_loop().await;
        self.subscription.unsubscribe();

        match &result {
            Ok(()) => info!(watcher = %self.name, "Hub watcher stopped"),
            Err(e) => error!(watcher = %self.name, error = %e, "Hub watcher died"),
        }
        result
    }

    async fn event_loop(&mut self) -> std::result::Result<(), DispatcherError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Stop,
                request = self.request_rx.recv() => self.on_request(request),
                message = self.subscription.recv() => self.on_message(message)?,
            };
            if let Step::Stop = step {
                return Ok(());
            }

            while !self.sync_events.is_empty() || !self.request_events.is_empty() {
                if let Step::Stop = self.flush().await? {
                    return Ok(());
                }
            }
        }
    }

    /// Delivers every queued sync event, then every queued request event, oldest
    /// first. Both queues may grow while this runs.
    async fn flush(&mut self) -> std::result::Result<Step, DispatcherError> {
        self.counters.sample_sync_len(self.sync_events.len());

        while let Some(event) = self.sync_events.pop_front() {
            if let Step::Stop = self.deliver(event).await? {
                return Ok(Step::Stop);
            }
        }

        while let Some(event) = self.pop_request_event() {
            if let Step::Stop = self.deliver(event).await? {
                return Ok(Step::Stop);
            }
            if !self.sync_events.is_empty() {
                // Fresh changes arrived while delivering, drain them first.
                break;
            }
        }

        Ok(Step::Continue)
    }

    /// Hands one event to its consumer, racing the send against new work.
    async fn deliver(
        &mut self,
        event: PendingEvent,
    ) -> std::result::Result<Step, DispatcherError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Step::Stop);
            }
            if !self.live.contains(&event.watch_id) {
                trace!(key = %event.key, watch_id = event.watch_id, "Skipping unwatched event");
                return Ok(Step::Continue);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(Step::Stop),
                request = self.request_rx.recv() => {
                    if let Step::Stop = self.on_request(request) {
                        return Ok(Step::Stop);
                    }
                }
                message = self.subscription.recv() => {
                    self.on_message(message)?;
                }
                permit = event.sender.reserve() => {
                    match permit {
                        Ok(permit) => {
                            permit.send(event.notification());
                            trace!(key = %event.key, revno = event.revno, "Event delivered");
                        }
                        Err(_) => {
                            warn!(
                                watcher = %self.name,
                                key = %event.key,
                                "Dropping event for watcher whose receiver is gone"
                            );
                        }
                    }
                    return Ok(Step::Continue);
                }
            }
        }
    }

    fn on_request(
        &mut self,
        request: Option<WatcherRequest>,
    ) -> Step {
        match request {
            Some(request) => {
                self.handle_request(request);
                Step::Continue
            }
            None => {
                debug!(watcher = %self.name, "All hub watcher handles dropped");
                Step::Stop
            }
        }
    }

    fn on_message(
        &mut self,
        message: Option<HubMessage>,
    ) -> std::result::Result<Step, DispatcherError> {
        let HubMessage { topic, payload } = message.ok_or(DispatcherError::SourceClosed)?;

        match topic.as_str() {
            TXN_WATCHER_RESTARTED => Err(DispatcherError::SourceRestarted),
            TXN_WATCHER_COLLECTION => match payload {
                Payload::Change(change) => {
                    self.queue_change(change);
                    Ok(Step::Continue)
                }
                other => Err(DispatcherError::UnexpectedPayload {
                    topic,
                    kind: other.kind(),
                }),
            },
            _ => {
                trace!(topic = %topic, "Ignoring hub message");
                Ok(Step::Continue)
            }
        }
    }

    pub(crate) fn handle_request(
        &mut self,
        request: WatcherRequest,
    ) {
        self.counters.request_count += 1;
        trace!(?request, "Handling request");

        match request {
            WatcherRequest::Watch {
                key,
                sender,
                filter,
                reply,
            } => {
                let result = self.add_watch(key, sender, filter);
                let _ = reply.send(result);
            }
            WatcherRequest::WatchMulti {
                collection,
                ids,
                sender,
                reply,
            } => {
                let result = self.add_watch_multi(collection, ids, sender);
                let _ = reply.send(result);
            }
            WatcherRequest::Unwatch { key, sender, reply } => {
                let result = self.remove_watch(&key, &sender);
                let _ = reply.send(result);
            }
            WatcherRequest::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    pub(crate) fn queue_change(
        &mut self,
        change: Change,
    ) {
        self.counters.change_count += 1;
        trace!(?change, "Got change");

        let revno = change.tracked_revno();
        self.tracker.update(&change.collection, &change.id, revno);

        let doc_key = change.key();

        if let Some(infos) = self.watches.get(&WatchKey::collection(change.collection.as_str())) {
            for info in infos.iter().filter(|info| info.accepts(&change.id)) {
                Self::route_change_event(
                    &mut self.request_backlog,
                    &mut self.sync_events,
                    &mut self.request_events,
                    PendingEvent {
                        watch_id: info.id,
                        sender: info.sender.clone(),
                        key: doc_key.clone(),
                        revno: change.revno,
                        deleted: change.deleted,
                    },
                );
                self.counters.sync_event_collection_count += 1;
            }
        }

        if let Some(infos) = self.watches.get(&doc_key) {
            for info in infos {
                Self::route_change_event(
                    &mut self.request_backlog,
                    &mut self.sync_events,
                    &mut self.request_events,
                    PendingEvent {
                        watch_id: info.id,
                        sender: info.sender.clone(),
                        key: doc_key.clone(),
                        revno: change.revno,
                        deleted: change.deleted,
                    },
                );
                self.counters.sync_event_doc_count += 1;
            }
        }

        self.counters.observe_sync_len(self.sync_events.len());
    }

    /// Queues a change event on the sync queue, unless its registration still
    /// has undelivered request events; then it goes behind them.
    fn route_change_event(
        request_backlog: &mut HashMap<WatchId, usize>,
        sync_events: &mut VecDeque<PendingEvent>,
        request_events: &mut VecDeque<PendingEvent>,
        event: PendingEvent,
    ) {
        match request_backlog.get_mut(&event.watch_id) {
            Some(pending) => {
                *pending += 1;
                trace!(key = %event.key, watch_id = event.watch_id, "Change queued behind initial event");
                request_events.push_back(event);
            }
            None => sync_events.push_back(event),
        }
    }

    fn push_request_event(
        &mut self,
        event: PendingEvent,
    ) {
        *self.request_backlog.entry(event.watch_id).or_insert(0) += 1;
        self.request_events.push_back(event);
    }

    fn pop_request_event(&mut self) -> Option<PendingEvent> {
        let event = self.request_events.pop_front()?;
        if let Some(pending) = self.request_backlog.get_mut(&event.watch_id) {
            *pending -= 1;
            if *pending == 0 {
                self.request_backlog.remove(&event.watch_id);
            }
        }
        Some(event)
    }

    fn is_watching(
        &self,
        key: &WatchKey,
        sender: &NotificationSender,
    ) -> bool {
        self.watches
            .get(key)
            .is_some_and(|infos| infos.iter().any(|info| info.sender.same_channel(sender)))
    }

    fn add_watch(
        &mut self,
        key: WatchKey,
        sender: NotificationSender,
        filter: Option<IdFilter>,
    ) -> std::result::Result<(), RegistrationViolation> {
        if self.is_watching(&key, &sender) {
            error!(watcher = %self.name, key = %key, "Duplicate watch rejected");
            return Err(RegistrationViolation::DuplicateWatch(key));
        }
        self.register(key, sender, filter);
        Ok(())
    }

    fn add_watch_multi(
        &mut self,
        collection: String,
        ids: Vec<String>,
        sender: NotificationSender,
    ) -> std::result::Result<(), RegistrationViolation> {
        let keys: Vec<WatchKey> = ids
            .into_iter()
            .map(|id| WatchKey::document(collection.as_str(), id))
            .collect();

        if let Some(key) = keys.iter().find(|key| self.is_watching(key, &sender)) {
            error!(watcher = %self.name, key = %key, "Duplicate watch rejected");
            return Err(RegistrationViolation::DuplicateWatch(key.clone()));
        }
        for key in keys {
            self.register(key, sender.clone(), None);
        }
        Ok(())
    }

    /// Adds the registration and queues its initial notification.
    fn register(
        &mut self,
        key: WatchKey,
        sender: NotificationSender,
        filter: Option<IdFilter>,
    ) {
        let watch_id = self.next_watch_id;
        self.next_watch_id += 1;

        let (revno, deleted) = match &key.id {
            Some(id) => match self.tracker.find(&key.collection, id) {
                Some(revno) => (revno, revno == REVNO_MISSING),
                None => (REVNO_MISSING, false),
            },
            None => (REVNO_MISSING, false),
        };

        self.push_request_event(PendingEvent {
            watch_id,
            sender: sender.clone(),
            key: key.clone(),
            revno,
            deleted,
        });

        debug!(watcher = %self.name, key = %key, watch_id, "Watch registered");
        self.watches.entry(key).or_default().push(WatchInfo {
            id: watch_id,
            sender,
            filter,
        });
        self.live.insert(watch_id);
    }

    fn remove_watch(
        &mut self,
        key: &WatchKey,
        sender: &NotificationSender,
    ) -> std::result::Result<(), RegistrationViolation> {
        let Some(infos) = self.watches.get_mut(key) else {
            error!(watcher = %self.name, key = %key, "Unwatch of unknown key rejected");
            return Err(RegistrationViolation::UnknownWatch(key.clone()));
        };
        let Some(position) = infos.iter().position(|info| info.sender.same_channel(sender)) else {
            error!(watcher = %self.name, key = %key, "Unwatch of unknown channel rejected");
            return Err(RegistrationViolation::UnknownWatch(key.clone()));
        };

        let removed = infos.swap_remove(position);
        if infos.is_empty() {
            self.watches.remove(key);
        }
        // Any queued event for this registration is now a tombstone.
        self.live.remove(&removed.id);

        debug!(watcher = %self.name, key = %key, watch_id = removed.id, "Watch removed");
        Ok(())
    }

    pub(crate) fn stats(&self) -> Stats {
        Stats {
            watch_key_count: self.watches.len(),
            watch_count: self.live.len(),
            sync_queue_cap: self.sync_events.capacity(),
            sync_queue_len: self.sync_events.len(),
            sync_last_len: self.counters.sync_last_len,
            sync_avg_len: self.counters.sync_avg_len,
            sync_max_len: self.counters.sync_max_len,
            sync_event_doc_count: self.counters.sync_event_doc_count,
            sync_event_collection_count: self.counters.sync_event_collection_count,
            request_queue_cap: self.request_events.capacity(),
            request_queue_len: self.request_events.len(),
            request_count: self.counters.request_count,
            change_count: self.counters.change_count,
        }
    }

    #[cfg(test)]
    pub(crate) fn tracker(&self) -> &RevnoTracker {
        &self.tracker
    }

    #[cfg(test)]
    pub(crate) fn pending_sync(&self) -> impl Iterator<Item = &PendingEvent> {
        self.sync_events.iter().filter(|e| self.live.contains(&e.watch_id))
    }

    /// Removes every queued request event as if it had been delivered.
    #[cfg(test)]
    pub(crate) fn take_request_events(&mut self) -> Vec<PendingEvent> {
        std::iter::from_fn(|| self.pop_request_event()).collect()
    }

    #[cfg(test)]
    pub(crate) fn pending_requests(&self) -> impl Iterator<Item = &PendingEvent> {
        self.request_events.iter().filter(|e| self.live.contains(&e.watch_id))
    }
}
