use crate::DispatcherError;

/// Lifecycle of a hub watcher: `Running → Dying → Dead`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherState {
    Running,
    /// Shutdown requested or a fatal error seen; the loop is exiting
    Dying,
    /// Loop returned and the subscription is cancelled; holds the terminal error
    Dead(Option<DispatcherError>),
}

impl WatcherState {
    pub fn is_running(&self) -> bool {
        matches!(self, WatcherState::Running)
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, WatcherState::Dead(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherState::Running => "running",
            WatcherState::Dying => "dying",
            WatcherState::Dead(_) => "dead",
        }
    }
}
