//! File watching for automatic snapshot refreshes.

use crate::error::{ConfigError, Result};
use crate::snapshot::{RefreshOutcome, SnapshotProvider, SnapshotRefresher};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of the outcome channel; outcomes are dropped while it is full.
const OUTCOME_CAPACITY: usize = 100;

/// Watches configuration files and polls a [`SnapshotRefresher`] when they change.
///
/// Bursts of file events are debounced: the refresher is polled once the
/// files have been quiet for the debounce duration. Each poll runs on a
/// blocking task, since refreshes invoke listeners synchronously. The
/// outcome of every poll is sent on the returned channel.
///
/// Must be created inside a Tokio runtime. Dropping the watcher stops it.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_bindings::prelude::*;
/// use hotswap_bindings::notify::SnapshotWatcher;
/// use hotswap_bindings::snapshot::{FileSnapshotProvider, SnapshotRefresher};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<()> {
/// let service = Arc::new(DeltaService::new());
/// let refresher = Arc::new(SnapshotRefresher::new(
///     service,
///     FileSnapshotProvider::new("config/app.yaml"),
/// ));
/// refresher.initialize()?;
///
/// let (watcher, mut outcomes) = SnapshotWatcher::new(refresher, Duration::from_millis(500))?;
/// watcher.watch("config/app.yaml").await?;
///
/// while let Some(outcome) = outcomes.recv().await {
///     println!("refresh: {:?}", outcome);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SnapshotWatcher {
    watcher: Arc<tokio::sync::Mutex<RecommendedWatcher>>,
    debounce_duration: Duration,
    watched_paths: Arc<tokio::sync::Mutex<Vec<PathBuf>>>,
    task: JoinHandle<()>,
}

impl SnapshotWatcher {
    /// Create a watcher that polls `refresher` after file changes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WatchError`] if the underlying file watcher
    /// cannot be created.
    pub fn new<P>(
        refresher: Arc<SnapshotRefresher<P>>,
        debounce_duration: Duration,
    ) -> Result<(Self, mpsc::Receiver<Result<RefreshOutcome>>)>
    where
        P: SnapshotProvider + 'static,
    {
        let (tx, rx) = mpsc::channel(OUTCOME_CAPACITY);

        // Channel for raw events from notify
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                // Only care about write/create events
                if matches!(
                    event.kind,
                    notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                ) {
                    let _ = event_tx.send(event);
                }
            }
        })
        .map_err(|e| ConfigError::WatchError(format!("Failed to create file watcher: {}", e)))?;

        let task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!(paths = ?event.paths, "Configuration file changed");

                // Trailing debounce: wait until no event arrived for a full period
                loop {
                    match tokio::time::timeout(debounce_duration, event_rx.recv()).await {
                        Ok(Some(_)) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }

                let outcome = poll_blocking(Arc::clone(&refresher)).await;
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(outcome) {
                    break;
                }
            }
        });

        Ok((
            Self {
                watcher: Arc::new(tokio::sync::Mutex::new(watcher)),
                debounce_duration,
                watched_paths: Arc::new(tokio::sync::Mutex::new(Vec::new())),
                task,
            },
            rx,
        ))
    }

    /// Add a path to watch for changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be watched (e.g., doesn't exist).
    pub async fn watch(&self, path: impl AsRef<Path>) -> Result<()> {
        let canonical_path = path.as_ref().canonicalize().map_err(|e| {
            ConfigError::WatchError(format!("Failed to resolve path: {}", e))
        })?;

        let mut watcher = self.watcher.lock().await;
        watcher
            .watch(&canonical_path, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::WatchError(format!("Failed to watch path: {}", e)))?;

        let mut paths = self.watched_paths.lock().await;
        if !paths.contains(&canonical_path) {
            paths.push(canonical_path);
        }

        Ok(())
    }

    /// Stop watching a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be unwatched.
    pub async fn unwatch(&self, path: impl AsRef<Path>) -> Result<()> {
        let canonical_path = path.as_ref().canonicalize().map_err(|e| {
            ConfigError::WatchError(format!("Failed to resolve path for unwatching: {}", e))
        })?;

        let mut watcher = self.watcher.lock().await;
        watcher
            .unwatch(&canonical_path)
            .map_err(|e| ConfigError::WatchError(format!("Failed to unwatch path: {}", e)))?;

        let mut paths = self.watched_paths.lock().await;
        paths.retain(|p| p != &canonical_path);

        Ok(())
    }

    /// Get the debounce duration for this watcher.
    pub fn debounce_duration(&self) -> Duration {
        self.debounce_duration
    }

    /// Get a list of currently watched paths.
    pub async fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched_paths.lock().await.clone()
    }
}

impl Drop for SnapshotWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Poll `refresher` every `interval` until the receiver is dropped.
///
/// The first poll happens after one interval. Use this for providers that
/// cannot be watched, or as a safety net next to a [`SnapshotWatcher`].
/// Must be called inside a Tokio runtime.
pub fn spawn_polling<P>(
    refresher: Arc<SnapshotRefresher<P>>,
    interval: Duration,
) -> (JoinHandle<()>, mpsc::Receiver<Result<RefreshOutcome>>)
where
    P: SnapshotProvider + 'static,
{
    let (tx, rx) = mpsc::channel(OUTCOME_CAPACITY);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let outcome = poll_blocking(Arc::clone(&refresher)).await;
            if matches!(outcome, Ok(RefreshOutcome::Unchanged)) {
                if tx.is_closed() {
                    break;
                }
                continue;
            }
            if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(outcome) {
                break;
            }
        }
    });

    (handle, rx)
}

async fn poll_blocking<P>(refresher: Arc<SnapshotRefresher<P>>) -> Result<RefreshOutcome>
where
    P: SnapshotProvider + 'static,
{
    match tokio::task::spawn_blocking(move || refresher.poll()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Snapshot poll task failed");
            Err(ConfigError::WatchError(format!("Snapshot poll task failed: {}", e)))
        }
    }
}
