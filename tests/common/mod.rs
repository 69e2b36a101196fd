use std::time::Duration;

use d_watch::hub::SimpleHub;
use d_watch::DispatcherConfig;
use d_watch::HubWatcher;
use d_watch::Notification;
use tokio::sync::mpsc;
use tokio::time;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(3);

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = env_logger::try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

pub fn start_watcher(
    hub: &SimpleHub,
    name: &str,
) -> HubWatcher {
    enable_logger();
    let config = DispatcherConfig {
        name: name.to_string(),
        ..Default::default()
    };
    HubWatcher::new(hub, config)
}

pub async fn next(rx: &mut mpsc::Receiver<Notification>) -> Notification {
    time::timeout(WAIT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification channel closed")
}

pub async fn assert_quiet(rx: &mut mpsc::Receiver<Notification>) {
    if let Ok(Some(n)) = time::timeout(Duration::from_millis(50), rx.recv()).await {
        panic!("unexpected notification: {n:?}");
    }
}
