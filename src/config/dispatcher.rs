use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// Tunables of the dispatcher loop
///
/// None of these change delivery semantics; they size buffers and shape the
/// statistics.
///
/// # Configuration Example
///
/// ```toml
/// [dispatcher]
/// name = "model-cache"
/// request_channel_size = 1024
/// initial_queue_capacity = 64
/// sync_len_ewma_weight = 0.1
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatcherConfig {
    /// Name used in logs and as the `watcher` metrics label
    #[serde(default = "default_name")]
    pub name: String,

    /// Buffer of the request channel between handles and the loop
    ///
    /// Callers wait for their reply anyway, so this only absorbs bursts of
    /// concurrent registrations.
    ///
    /// **Default**: 1024
    #[serde(default = "default_request_channel_size")]
    pub request_channel_size: usize,

    /// Initial capacity of each event queue; queues grow on demand
    ///
    /// **Default**: 64
    #[serde(default = "default_initial_queue_capacity")]
    pub initial_queue_capacity: usize,

    /// Weight of the newest sample in the sync queue length moving average,
    /// in `(0, 1]`
    ///
    /// **Default**: 0.1
    #[serde(default = "default_sync_len_ewma_weight")]
    pub sync_len_ewma_weight: f64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            request_channel_size: default_request_channel_size(),
            initial_queue_capacity: default_initial_queue_capacity(),
            sync_len_ewma_weight: default_sync_len_ewma_weight(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "dispatcher.name must not be empty".into(),
            )));
        }

        if self.request_channel_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "dispatcher.request_channel_size must be greater than 0".into(),
            )));
        }

        if !(self.sync_len_ewma_weight > 0.0 && self.sync_len_ewma_weight <= 1.0) {
            return Err(Error::Config(ConfigError::Message(format!(
                "dispatcher.sync_len_ewma_weight must be in (0, 1], got {}",
                self.sync_len_ewma_weight
            ))));
        }

        if self.initial_queue_capacity > 1_000_000 {
            warn!(
                "dispatcher.initial_queue_capacity ({}) is very large; both queues preallocate it",
                self.initial_queue_capacity
            );
        }

        Ok(())
    }
}

fn default_name() -> String {
    "hub".to_string()
}
const fn default_request_channel_size() -> usize {
    1024
}
const fn default_initial_queue_capacity() -> usize {
    64
}
const fn default_sync_len_ewma_weight() -> f64 {
    0.1
}
