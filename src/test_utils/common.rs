use std::time::Duration;

use tokio::sync::mpsc;

use crate::Notification;

/// Upper bound for anything a test expects to happen.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a test waits before concluding nothing was sent.
pub const QUIET_PERIOD: Duration = Duration::from_millis(50);

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = env_logger::try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Next notification on `rx`, panicking if none arrives in time.
pub async fn recv_notification(rx: &mut mpsc::Receiver<Notification>) -> Notification {
    match tokio::time::timeout(RECV_TIMEOUT, rx.recv()).await {
        Ok(Some(notification)) => notification,
        Ok(None) => panic!("notification channel closed"),
        Err(_) => panic!("no notification within {RECV_TIMEOUT:?}"),
    }
}

/// Asserts nothing is pending on `rx` for [`QUIET_PERIOD`].
pub async fn assert_no_notification(rx: &mut mpsc::Receiver<Notification>) {
    if let Ok(Some(notification)) = tokio::time::timeout(QUIET_PERIOD, rx.recv()).await {
        panic!("unexpected notification: {notification:?}");
    }
}
