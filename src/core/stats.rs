use serde::Deserialize;
use serde::Serialize;

/// Snapshot of the dispatcher's registry, queues and counters.
///
/// Produced by the dispatcher loop itself in answer to a stats request. All
/// `*_count` fields are cumulative since the watcher started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Distinct keys with at least one registration
    pub watch_key_count: usize,
    /// Registrations across all keys
    pub watch_count: usize,

    pub sync_queue_cap: usize,
    pub sync_queue_len: usize,
    /// Sync queue length at the start of the most recent drain
    pub sync_last_len: usize,
    /// Moving average of `sync_last_len`
    pub sync_avg_len: f64,
    pub sync_max_len: usize,
    pub sync_event_doc_count: u64,
    pub sync_event_collection_count: u64,

    pub request_queue_cap: usize,
    pub request_queue_len: usize,
    pub request_count: u64,

    pub change_count: u64,
}

/// Counters maintained by the loop between stats requests.
#[derive(Debug)]
pub(crate) struct LoopCounters {
    pub(crate) change_count: u64,
    pub(crate) request_count: u64,
    pub(crate) sync_event_doc_count: u64,
    pub(crate) sync_event_collection_count: u64,
    pub(crate) sync_max_len: usize,
    pub(crate) sync_last_len: usize,
    pub(crate) sync_avg_len: f64,
    ewma_weight: f64,
}

impl LoopCounters {
    pub(crate) fn new(ewma_weight: f64) -> Self {
        Self {
            change_count: 0,
            request_count: 0,
            sync_event_doc_count: 0,
            sync_event_collection_count: 0,
            sync_max_len: 0,
            sync_last_len: 0,
            sync_avg_len: 0.0,
            ewma_weight,
        }
    }

    /// Records the sync queue length seen at the start of a drain.
    pub(crate) fn sample_sync_len(
        &mut self,
        len: usize,
    ) {
        self.sync_last_len = len;
        self.sync_avg_len = self.ewma_weight * len as f64 + (1.0 - self.ewma_weight) * self.sync_avg_len;
    }

    pub(crate) fn observe_sync_len(
        &mut self,
        len: usize,
    ) {
        if len > self.sync_max_len {
            self.sync_max_len = len;
        }
    }
}
