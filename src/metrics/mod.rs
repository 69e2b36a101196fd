//! Prometheus export of hub watcher statistics.
//!
//! The dispatcher never touches these gauges itself; a reporter task polls
//! [`HubWatcher::stats`] and copies the snapshot in, labelled by watcher name.

use std::time::Duration;

use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use prometheus::Encoder;
use prometheus::GaugeVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use crate::Error;
use crate::HubWatcher;
use crate::MonitoringConfig;
use crate::Result;
use crate::Stats;


lazy_static! {
    pub static ref WATCH_KEYS_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("hub_watcher_watch_keys", "Distinct keys with at least one watch"),
        &["watcher"]
    )
    .expect("metric can not be created");

    pub static ref WATCHES_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("hub_watcher_watches", "Registered watches across all keys"),
        &["watcher"]
    )
    .expect("metric can not be created");

    pub static ref QUEUE_LEN_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("hub_watcher_queue_len", "Pending events per queue"),
        &["watcher", "queue"]
    )
    .expect("metric can not be created");

    pub static ref QUEUE_CAP_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("hub_watcher_queue_cap", "Allocated capacity per queue"),
        &["watcher", "queue"]
    )
    .expect("metric can not be created");

    pub static ref SYNC_QUEUE_LAST_LEN_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("hub_watcher_sync_queue_last_len", "Sync queue length at the start of the last drain"),
        &["watcher"]
    )
    .expect("metric can not be created");

    pub static ref SYNC_QUEUE_MAX_LEN_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("hub_watcher_sync_queue_max_len", "Highest sync queue length seen"),
        &["watcher"]
    )
    .expect("metric can not be created");

    pub static ref SYNC_QUEUE_AVG_LEN_METRIC: GaugeVec = GaugeVec::new(
        Opts::new("hub_watcher_sync_queue_avg_len", "Moving average of the sync queue length per drain"),
        &["watcher"]
    )
    .expect("metric can not be created");

    pub static ref SYNC_EVENTS_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("hub_watcher_sync_events", "Sync events queued since start, by kind of watch"),
        &["watcher", "kind"]
    )
    .expect("metric can not be created");

    pub static ref REQUESTS_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("hub_watcher_requests", "Requests handled since start"),
        &["watcher"]
    )
    .expect("metric can not be created");

    pub static ref CHANGES_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("hub_watcher_changes", "Changes received since start"),
        &["watcher"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

/// Outcome of the first registration attempt, replayed to every later caller.
static REGISTERED: OnceCell<std::result::Result<(), String>> = OnceCell::new();

fn try_register_custom_metrics() -> Result<()> {
    REGISTRY.register(Box::new(WATCH_KEYS_METRIC.clone()))?;
    REGISTRY.register(Box::new(WATCHES_METRIC.clone()))?;
    REGISTRY.register(Box::new(QUEUE_LEN_METRIC.clone()))?;
    REGISTRY.register(Box::new(QUEUE_CAP_METRIC.clone()))?;
    REGISTRY.register(Box::new(SYNC_QUEUE_LAST_LEN_METRIC.clone()))?;
    REGISTRY.register(Box::new(SYNC_QUEUE_MAX_LEN_METRIC.clone()))?;
    REGISTRY.register(Box::new(SYNC_QUEUE_AVG_LEN_METRIC.clone()))?;
    REGISTRY.register(Box::new(SYNC_EVENTS_METRIC.clone()))?;
    REGISTRY.register(Box::new(REQUESTS_METRIC.clone()))?;
    REGISTRY.register(Box::new(CHANGES_METRIC.clone()))?;
    Ok(())
}

/// Registers the hub watcher gauges with [`REGISTRY`].
///
/// Registration runs once; later calls return the same outcome, including a
/// failure.
pub fn register_custom_metrics() -> Result<()> {
    registration_outcome(&REGISTERED, try_register_custom_metrics)
}

fn registration_outcome(
    cell: &OnceCell<std::result::Result<(), String>>,
    register: impl FnOnce() -> Result<()>,
) -> Result<()> {
    cell.get_or_init(|| register().map_err(|e| e.to_string()))
        .clone()
        .map_err(|msg| Error::Metrics(prometheus::Error::Msg(msg)))
}

fn gauge_value(value: impl TryInto<i64>) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

/// Copies a stats snapshot into the gauges labelled `watcher`.
pub fn record_stats(
    watcher: &str,
    stats: &Stats,
) {
    WATCH_KEYS_METRIC
        .with_label_values(&[watcher])
        .set(gauge_value(stats.watch_key_count));
    WATCHES_METRIC.with_label_values(&[watcher]).set(gauge_value(stats.watch_count));

    QUEUE_LEN_METRIC
        .with_label_values(&[watcher, "sync"])
        .set(gauge_value(stats.sync_queue_len));
    QUEUE_LEN_METRIC
        .with_label_values(&[watcher, "request"])
        .set(gauge_value(stats.request_queue_len));
    QUEUE_CAP_METRIC
        .with_label_values(&[watcher, "sync"])
        .set(gauge_value(stats.sync_queue_cap));
    QUEUE_CAP_METRIC
        .with_label_values(&[watcher, "request"])
        .set(gauge_value(stats.request_queue_cap));

    SYNC_QUEUE_LAST_LEN_METRIC
        .with_label_values(&[watcher])
        .set(gauge_value(stats.sync_last_len));
    SYNC_QUEUE_MAX_LEN_METRIC
        .with_label_values(&[watcher])
        .set(gauge_value(stats.sync_max_len));
    SYNC_QUEUE_AVG_LEN_METRIC.with_label_values(&[watcher]).set(stats.sync_avg_len);

    SYNC_EVENTS_METRIC
        .with_label_values(&[watcher, "doc"])
        .set(gauge_value(stats.sync_event_doc_count));
    SYNC_EVENTS_METRIC
        .with_label_values(&[watcher, "collection"])
        .set(gauge_value(stats.sync_event_collection_count));

    REQUESTS_METRIC
        .with_label_values(&[watcher])
        .set(gauge_value(stats.request_count));
    CHANGES_METRIC.with_label_values(&[watcher]).set(gauge_value(stats.change_count));
}

/// Polls `watcher` every `interval` and records the snapshot until it is dead.
///
/// The reporter holds a handle of its own, so the watcher must be stopped with
/// [`HubWatcher::kill`] rather than by dropping handles.
pub fn spawn_stats_reporter(
    watcher: HubWatcher,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let dead = watcher.dead();
        tokio::pin!(dead);

        loop {
            tokio::select! {
                _ = &mut dead => break,
                _ = ticker.tick() => {
                    let stats = watcher.stats().await;
                    record_stats(watcher.name(), &stats);
                }
            }
        }

        debug!(watcher = %watcher.name(), "Stats reporter stopped");
    })
}

/// Text exposition of everything in [`REGISTRY`].
pub fn gather_text() -> String {
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}

/// `GET /metrics`
pub fn routes() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("metrics").and(warp::get()).and_then(metrics_handler)
}

async fn metrics_handler() -> std::result::Result<impl Reply, Rejection> {
    Ok(gather_text())
}

/// Serves `/metrics` on `port` until `shutdown` is cancelled.
pub async fn start_server(
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    register_custom_metrics()?;

    let (addr, server) = warp::serve(routes()).try_bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
        shutdown.cancelled().await;
    })?;

    info!(%addr, "Metrics server listening");
    server.await;
    Ok(())
}

/// Tasks started by [`start_monitoring`].
#[derive(Debug)]
pub struct MonitoringTasks {
    /// Stops once the watcher is dead
    pub reporter: JoinHandle<()>,
    /// `/metrics` endpoint, present when enabled; resolves to its bind or
    /// serve error, or `Ok(())` after shutdown
    pub server: Option<JoinHandle<Result<()>>>,
}

/// Starts the stats reporter for `watcher` and, when enabled, the `/metrics`
/// endpoint. The endpoint runs until `shutdown` is cancelled.
pub fn start_monitoring(
    config: &MonitoringConfig,
    watcher: &HubWatcher,
    shutdown: CancellationToken,
) -> Result<MonitoringTasks> {
    register_custom_metrics()?;

    let server = config.prometheus_enabled.then(|| {
        let port = config.prometheus_port;
        tokio::spawn(async move {
            let result = start_server(port, shutdown).await;
            if let Err(e) = &result {
                error!(port, "Metrics server stopped: {}", e);
            }
            result
        })
    });

    Ok(MonitoringTasks {
        reporter: spawn_stats_reporter(watcher.clone(), config.stats_interval()),
        server,
    })
}
