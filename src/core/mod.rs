mod change;
mod dispatcher;
mod event;
mod revno_tracker;
mod stats;

pub use change::*;
pub(crate) use dispatcher::*;
pub(crate) use event::*;
pub use revno_tracker::*;
pub use stats::*;

#[cfg(test)]
mod revno_tracker_test;
