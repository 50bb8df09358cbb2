//! Triggers for snapshot refreshes.
//!
//! Provides file watching and interval polling that drive a
//! [`SnapshotRefresher`](crate::snapshot::SnapshotRefresher).

pub mod watcher;

pub use watcher::{SnapshotWatcher, spawn_polling};
