mod hub_watcher;
mod state;

pub use hub_watcher::*;
pub use state::*;
