//! # d-watch
//!
//! Change notification for document stores. A [`HubWatcher`] follows a
//! transaction-log change stream (any [`hub::ChangeSource`]) and fans every
//! document change out to the channels that registered interest in the
//! document or in its whole collection.
//!
//! ```text
//! txn log ──▶ hub ──▶ HubWatcher ──▶ per-watcher channels
//! ```
//!
//! Each registration first receives a synthetic notification carrying the
//! last known revno, then one notification per change. Delivery to one slow
//! consumer never holds up the others or the intake of new changes.

mod config;
mod core;
mod errors;
pub mod hub;
pub mod metrics;
mod watcher;

pub use config::*;
pub use core::*;
pub use errors::*;
pub use watcher::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
