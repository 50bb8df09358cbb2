//! Snapshot refresh protocol.
//!
//! A [`SnapshotProvider`] hands out immutable, timestamped configuration
//! sources. A [`SnapshotRefresher`] feeds them to a [`DeltaService`]: it
//! applies the initial snapshot, applies updates as they appear, and tells
//! the provider which snapshots were accepted and which were rejected.

mod file;

pub use file::FileSnapshotProvider;

use crate::core::DeltaService;
use crate::error::{Result, SnapshotError};
use crate::sources::ConfigurationSource;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// An immutable configuration source with its origin and age.
#[derive(Clone)]
pub struct Snapshot {
    source: Arc<dyn ConfigurationSource>,
    timestamp: DateTime<Utc>,
    location: String,
}

impl Snapshot {
    /// Wrap `source`, loaded from `location` at version `timestamp`.
    pub fn new(
        source: Arc<dyn ConfigurationSource>,
        timestamp: DateTime<Utc>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            source,
            timestamp,
            location: location.into(),
        }
    }

    /// The configuration this snapshot holds.
    pub fn source(&self) -> &Arc<dyn ConfigurationSource> {
        &self.source
    }

    /// When this version of the configuration was produced.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Where the snapshot came from, for diagnostics.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Location and timestamp, without the source.
    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            location: self.location.clone(),
            timestamp: self.timestamp,
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("location", &self.location)
            .field("timestamp", &self.timestamp)
            .field("source", &self.source.name())
            .finish()
    }
}

/// Identity of an applied snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Where the snapshot came from
    pub location: String,
    /// Version timestamp of the snapshot
    pub timestamp: DateTime<Utc>,
}

/// Supplies configuration snapshots.
pub trait SnapshotProvider: Send + Sync {
    /// The snapshot to start from.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::NoSnapshotAvailable`] when neither the
    /// configured location nor any fallback yields a usable snapshot.
    fn retrieve_initial(&self) -> std::result::Result<Snapshot, SnapshotError>;

    /// A snapshot newer than the last one offered, or `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidSnapshot`] when a newer version exists
    /// but cannot be loaded. That version is not offered again.
    fn retrieve_updated(&self) -> std::result::Result<Option<Snapshot>, SnapshotError>;

    /// The service refused `snapshot`; do not offer it again.
    fn reject(&self, snapshot: &Snapshot);

    /// The service applied `snapshot`.
    fn accept(&self, _snapshot: &Snapshot) {}
}

impl<P: SnapshotProvider + ?Sized> SnapshotProvider for Arc<P> {
    fn retrieve_initial(&self) -> std::result::Result<Snapshot, SnapshotError> {
        (**self).retrieve_initial()
    }

    fn retrieve_updated(&self) -> std::result::Result<Option<Snapshot>, SnapshotError> {
        (**self).retrieve_updated()
    }

    fn reject(&self, snapshot: &Snapshot) {
        (**self).reject(snapshot)
    }

    fn accept(&self, snapshot: &Snapshot) {
        (**self).accept(snapshot)
    }
}

/// Result of one [`SnapshotRefresher::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The provider had nothing new.
    Unchanged,
    /// A new snapshot was applied.
    Applied {
        /// Where the snapshot came from
        location: String,
        /// Version timestamp of the snapshot
        timestamp: DateTime<Utc>,
    },
}

impl From<SnapshotInfo> for RefreshOutcome {
    fn from(info: SnapshotInfo) -> Self {
        Self::Applied {
            location: info.location,
            timestamp: info.timestamp,
        }
    }
}

/// Drives a [`DeltaService`] from a [`SnapshotProvider`].
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_bindings::prelude::*;
/// use hotswap_bindings::snapshot::{FileSnapshotProvider, RefreshOutcome, SnapshotRefresher};
/// use std::sync::Arc;
///
/// # fn example() -> Result<()> {
/// let service = Arc::new(DeltaService::new());
/// let provider = FileSnapshotProvider::new("config/app.yaml")
///     .with_last_good("config/app.last-good.yaml");
///
/// let refresher = SnapshotRefresher::new(Arc::clone(&service), provider);
/// refresher.initialize()?;
///
/// // Later, from a scheduler or a file watcher:
/// if let RefreshOutcome::Applied { location, .. } = refresher.poll()? {
///     println!("applied {}", location);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SnapshotRefresher<P> {
    service: Arc<DeltaService>,
    provider: P,
    current: Mutex<Option<SnapshotInfo>>,
}

impl<P: SnapshotProvider> SnapshotRefresher<P> {
    /// Drive `service` from `provider`.
    pub fn new(service: Arc<DeltaService>, provider: P) -> Self {
        Self {
            service,
            provider,
            current: Mutex::new(None),
        }
    }

    /// The driven service.
    pub fn service(&self) -> &Arc<DeltaService> {
        &self.service
    }

    /// The snapshot provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The snapshot applied most recently.
    pub fn current(&self) -> Option<SnapshotInfo> {
        self.current.lock().clone()
    }

    /// Apply the provider's initial snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the provider has no snapshot, or if the service refuses it;
    /// a refused snapshot is rejected with the provider.
    pub fn initialize(&self) -> Result<SnapshotInfo> {
        let snapshot = self.provider.retrieve_initial()?;
        self.apply(snapshot)
    }

    /// Apply the provider's updated snapshot, if there is one.
    ///
    /// # Errors
    ///
    /// Fails if the provider reports an invalid snapshot or the service
    /// refuses the new one. The active source is unchanged either way.
    pub fn poll(&self) -> Result<RefreshOutcome> {
        match self.provider.retrieve_updated() {
            Ok(None) => Ok(RefreshOutcome::Unchanged),
            Ok(Some(snapshot)) => self.apply(snapshot).map(RefreshOutcome::from),
            Err(err) => {
                warn!(error = %err, "Snapshot provider reported an invalid snapshot");
                Err(err.into())
            }
        }
    }

    fn apply(&self, snapshot: Snapshot) -> Result<SnapshotInfo> {
        match self.service.refresh(Arc::clone(snapshot.source())) {
            Ok(()) => {
                self.provider.accept(&snapshot);
                let info = snapshot.info();
                info!(
                    location = %info.location,
                    timestamp = %info.timestamp,
                    "Snapshot applied"
                );
                *self.current.lock() = Some(info.clone());
                Ok(info)
            }
            Err(err) => {
                warn!(
                    location = snapshot.location(),
                    timestamp = %snapshot.timestamp(),
                    error = %err,
                    "Snapshot rejected"
                );
                self.provider.reject(&snapshot);
                Err(err)
            }
        }
    }
}

impl<P> fmt::Debug for SnapshotRefresher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotRefresher")
            .field("current", &*self.current.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::ValueDefinition;
    use crate::error::ConfigError;
    use crate::sources::TreeSource;
    use chrono::TimeZone;
    use std::collections::VecDeque;

    /// Hands out queued snapshots and records what happened to them.
    #[derive(Default)]
    struct QueuedProvider {
        initial: Mutex<Option<Snapshot>>,
        updates: Mutex<VecDeque<Snapshot>>,
        accepted: Mutex<Vec<String>>,
        rejected: Mutex<Vec<String>>,
    }

    impl SnapshotProvider for QueuedProvider {
        fn retrieve_initial(&self) -> std::result::Result<Snapshot, SnapshotError> {
            self.initial
                .lock()
                .take()
                .ok_or_else(|| SnapshotError::NoSnapshotAvailable {
                    location: "queue".to_string(),
                    reason: "empty".to_string(),
                })
        }

        fn retrieve_updated(&self) -> std::result::Result<Option<Snapshot>, SnapshotError> {
            Ok(self.updates.lock().pop_front())
        }

        fn reject(&self, snapshot: &Snapshot) {
            self.rejected.lock().push(snapshot.location().to_string());
        }

        fn accept(&self, snapshot: &Snapshot) {
            self.accepted.lock().push(snapshot.location().to_string());
        }
    }

    fn snapshot(location: &str, second: u32, x: Option<i64>) -> Snapshot {
        let mut builder = TreeSource::builder();
        if let Some(x) = x {
            builder = builder.set("x", x);
        }
        Snapshot::new(
            Arc::new(builder.build().unwrap()),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, second).unwrap(),
            location,
        )
    }

    #[test]
    fn test_initialize_and_poll() {
        let provider = Arc::new(QueuedProvider::default());
        *provider.initial.lock() = Some(snapshot("v1", 1, Some(1)));
        let service = Arc::new(DeltaService::new());
        let refresher = SnapshotRefresher::new(Arc::clone(&service), Arc::clone(&provider));

        let info = refresher.initialize().unwrap();
        assert_eq!(info.location, "v1");
        assert_eq!(service.retrieve::<i64>("x").unwrap(), 1);
        assert_eq!(refresher.poll().unwrap(), RefreshOutcome::Unchanged);

        provider.updates.lock().push_back(snapshot("v2", 2, Some(2)));
        match refresher.poll().unwrap() {
            RefreshOutcome::Applied { location, .. } => assert_eq!(location, "v2"),
            other => panic!("expected Applied, got {:?}", other),
        }
        assert_eq!(service.retrieve::<i64>("x").unwrap(), 2);
        assert_eq!(*provider.accepted.lock(), vec!["v1", "v2"]);
        assert_eq!(refresher.current().map(|c| c.location), Some("v2".to_string()));
    }

    #[test]
    fn test_refused_snapshot_is_rejected() {
        let provider = Arc::new(QueuedProvider::default());
        *provider.initial.lock() = Some(snapshot("v1", 1, Some(1)));
        let service = Arc::new(DeltaService::new());
        let refresher = SnapshotRefresher::new(Arc::clone(&service), Arc::clone(&provider));
        refresher.initialize().unwrap();
        service
            .register(&ValueDefinition::<i64>::new("x", |_, _| Ok(())), true)
            .unwrap();

        provider.updates.lock().push_back(snapshot("broken", 2, None));
        let err = refresher.poll().unwrap_err();

        assert!(matches!(err, ConfigError::Refresh(_)));
        assert_eq!(*provider.rejected.lock(), vec!["broken"]);
        assert_eq!(refresher.current().map(|c| c.location), Some("v1".to_string()));
        assert_eq!(service.retrieve::<i64>("x").unwrap(), 1);
    }

    #[test]
    fn test_initialize_without_snapshot() {
        let refresher =
            SnapshotRefresher::new(Arc::new(DeltaService::new()), QueuedProvider::default());
        assert!(matches!(
            refresher.initialize(),
            Err(ConfigError::Snapshot(SnapshotError::NoSnapshotAvailable { .. }))
        ));
        assert!(refresher.current().is_none());
    }
}
