//! The change-propagation service.

use crate::binding::{DefinitionId, GroupId, ValueDefinition, ValueDefinitionGroup};
use crate::core::DeltaServiceBuilder;
use crate::delta::{self, DeltaValueInterceptor, GroupUpdater, LastValueMap, ValueTracker};
use crate::error::{ConfigError, RefreshPhase, Result};
use crate::sources::{ConfigurationSource, ConverterRegistry, FallbackConfigurationSource, Query};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use crate::metrics::DeltaMetrics;

/// Registrations and their tracked values, guarded by the service lock.
struct ServiceState {
    standalone: ValueDefinitionGroup,
    groups: Vec<ValueDefinitionGroup>,
    last_values: LastValueMap,
}

impl ServiceState {
    /// Every group in processing order: standalone first, then registration order.
    fn ordered_groups(&self) -> Vec<&ValueDefinitionGroup> {
        std::iter::once(&self.standalone)
            .chain(self.groups.iter())
            .collect()
    }

    fn owning_group(&self, binding: DefinitionId) -> Option<&ValueDefinitionGroup> {
        self.ordered_groups()
            .into_iter()
            .find(|group| group.contains(binding))
    }

    fn binding_count(&self) -> usize {
        self.standalone.len() + self.groups.iter().map(ValueDefinitionGroup::len).sum::<usize>()
    }
}

/// Sizes published after every change to [`ServiceState`], readable without
/// the service lock.
#[derive(Default)]
struct Counts {
    groups: AtomicUsize,
    bindings: AtomicUsize,
    tracked: AtomicUsize,
}

/// Keeps registered bindings in step with the active configuration source.
///
/// Callers register [`ValueDefinition`]s and [`ValueDefinitionGroup`]s once;
/// every later [`refresh`](Self::refresh) re-resolves all of them against the
/// new source and hands the new values to their listeners. A refresh either
/// resolves every binding or changes nothing: if any group fails discovery no
/// listener runs and the active source stays as it was.
///
/// Administrative calls (`register*`, `unregister*`, `refresh`, `shutdown`)
/// are serialized by one service-wide lock. Plain retrieval reads the active
/// source without taking it, and so do the introspection getters
/// ([`binding_count`](Self::binding_count) and friends). Listeners run while
/// that lock is held and must not call back into the administrative
/// operations; retrieval and introspection are safe from a listener.
///
/// # Examples
///
/// ```rust
/// use hotswap_bindings::prelude::*;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI64, Ordering};
///
/// # fn example() -> hotswap_bindings::error::Result<()> {
/// let service = DeltaService::builder()
///     .with_source(Arc::new(TreeSource::builder().set("pool.size", 4i64).build()?))
///     .build();
///
/// let size = Arc::new(AtomicI64::new(0));
/// let slot = Arc::clone(&size);
/// let definition = ValueDefinition::<i64>::new("pool.size", move |new: Arc<i64>, _old| {
///     slot.store(*new, Ordering::SeqCst);
///     Ok(())
/// });
/// service.register(&definition, true)?;
/// assert_eq!(size.load(Ordering::SeqCst), 4);
///
/// service.refresh(Arc::new(TreeSource::builder().set("pool.size", 8i64).build()?))?;
/// assert_eq!(size.load(Ordering::SeqCst), 8);
/// # Ok(())
/// # }
/// ```
pub struct DeltaService {
    /// Active source, swapped atomically on a successful refresh
    active: ArcSwap<FallbackConfigurationSource>,
    state: Mutex<ServiceState>,
    standalone_id: GroupId,
    counts: Counts,
    converters: ConverterRegistry,
    interceptor: Option<Arc<dyn DeltaValueInterceptor>>,
    #[cfg(feature = "metrics")]
    metrics: Option<DeltaMetrics>,
}

impl DeltaService {
    /// Create a new builder for a service.
    pub fn builder() -> DeltaServiceBuilder {
        DeltaServiceBuilder::new()
    }

    /// A service with no source, no interceptor and no converters.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub(crate) fn from_parts(
        source: FallbackConfigurationSource,
        converters: ConverterRegistry,
        interceptor: Option<Arc<dyn DeltaValueInterceptor>>,
        #[cfg(feature = "metrics")] metrics: Option<DeltaMetrics>,
    ) -> Self {
        let standalone = ValueDefinitionGroup::standalone();
        Self {
            active: ArcSwap::from_pointee(source),
            standalone_id: standalone.id(),
            state: Mutex::new(ServiceState {
                standalone,
                groups: Vec::new(),
                last_values: LastValueMap::new(),
            }),
            counts: Counts::default(),
            converters,
            interceptor,
            #[cfg(feature = "metrics")]
            metrics,
        }
    }

    fn interceptor(&self) -> Option<&dyn DeltaValueInterceptor> {
        self.interceptor.as_deref()
    }

    /// Register a single definition in the standalone group.
    ///
    /// The definition is resolved against the active source right away. With
    /// `fire_immediately` its listener also receives that value (old value
    /// `None`); without it, the listener first hears from the next refresh.
    /// Registering a definition that is already standalone does nothing.
    ///
    /// # Errors
    ///
    /// Nothing is registered if the value cannot be resolved, if the
    /// listener rejects it, or if the definition already belongs to a group.
    pub fn register<T: Send + Sync + 'static>(
        &self,
        definition: &ValueDefinition<T>,
        fire_immediately: bool,
    ) -> Result<()> {
        let binding = definition.to_binding();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.standalone.contains(binding.id()) {
            debug!(binding = %binding.descriptor(), "Definition already registered");
            return Ok(());
        }
        if let Some(group) = state.owning_group(binding.id()) {
            return Err(ConfigError::InvariantViolation(format!(
                "{} is already registered in group '{}'",
                binding.descriptor(),
                group.name()
            )));
        }

        let source = self.active.load_full();
        let action = delta::resolve(&binding, &*source, &self.converters)?;

        if fire_immediately {
            let committed = {
                let _lock = state.standalone.lock().lock();
                let mut tracker = ValueTracker::new(&state.last_values, self.interceptor());
                delta::commit(action, &mut tracker)?;
                tracker.into_committed()
            };
            state.last_values.merge(committed);
        }

        debug!(binding = %binding.descriptor(), fire_immediately, "Definition registered");
        state.standalone.insert(binding);
        self.record_counts(state);
        Ok(())
    }

    /// Register a group and return the id used to unregister it.
    ///
    /// All bindings are resolved against the active source. With
    /// `fire_immediately` they are committed in order under the group's lock
    /// and the group listener runs once afterwards.
    ///
    /// # Errors
    ///
    /// Nothing is registered if any binding fails to resolve, if a listener
    /// fails, or if one of the group's definitions is already registered.
    /// Values accepted by listeners before a failure are released.
    pub fn register_group(
        &self,
        group: ValueDefinitionGroup,
        fire_immediately: bool,
    ) -> Result<GroupId> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        for binding in group.values() {
            if let Some(owner) = state.owning_group(binding.id()) {
                return Err(ConfigError::InvariantViolation(format!(
                    "{} in group '{}' is already registered in group '{}'",
                    binding.descriptor(),
                    group.name(),
                    owner.name()
                )));
            }
        }

        let source = self.active.load_full();
        let committed = {
            let action = delta::resolve_group(&group, &*source, &self.converters)?;
            if fire_immediately {
                let mut tracker = ValueTracker::new(&state.last_values, self.interceptor());
                if let Err(err) = delta::commit_group(action, &*source, &mut tracker) {
                    let released = tracker.release_committed();
                    warn!(
                        group = group.name(),
                        phase = %err.phase(),
                        released,
                        "Group registration failed"
                    );
                    return Err(err.into());
                }
                Some(tracker.into_committed())
            } else {
                None
            }
        };

        if let Some(committed) = committed {
            state.last_values.merge(committed);
        }

        let id = group.id();
        info!(
            group = group.name(),
            values = group.len(),
            fire_immediately,
            "Group registered"
        );
        state.groups.push(group);
        self.record_counts(state);
        Ok(id)
    }

    /// Remove a standalone definition and release its tracked value.
    ///
    /// Returns `false` if the definition was not registered standalone.
    pub fn unregister<T: Send + Sync + 'static>(&self, definition: &ValueDefinition<T>) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.standalone.remove(definition.id()).is_none() {
            return false;
        }
        state.last_values.release(definition.id(), self.interceptor());
        debug!(binding = %definition.descriptor(), "Definition unregistered");
        self.record_counts(state);
        true
    }

    /// Remove a group and release the tracked values of its bindings.
    ///
    /// Returns `Ok(false)` if no group with `id` is registered.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvariantViolation`] for the standalone group.
    pub fn unregister_group(&self, id: GroupId) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if id == state.standalone.id() {
            return Err(ConfigError::InvariantViolation(
                "the standalone group cannot be unregistered".to_string(),
            ));
        }

        let Some(index) = state.groups.iter().position(|group| group.id() == id) else {
            return Ok(false);
        };

        let mut group = state.groups.remove(index);
        for binding in group.clear() {
            state.last_values.release(binding.id(), self.interceptor());
        }
        info!(group = group.name(), "Group unregistered");
        self.record_counts(state);
        Ok(true)
    }

    /// Re-resolve every registered binding against `source` and commit.
    ///
    /// Expired registrations are swept first. `source` becomes the primary
    /// of the new active chain; the current fallback stays behind it.
    ///
    /// On success the active source is swapped and every superseded value is
    /// released. On failure the active source is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Refresh`]. In the discovery phase no listener
    /// ran. In the commit phase, groups that committed before or after the
    /// failing ones have already seen the new values; nothing is rolled back.
    pub fn refresh(&self, source: Arc<dyn ConfigurationSource>) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        #[cfg(feature = "metrics")]
        let timer = self.metrics.as_ref().map(DeltaMetrics::start_refresh);

        self.sweep(state);

        let source_name = source.name();
        let current = self.active.load_full();
        let candidate = Arc::new(FallbackConfigurationSource::new(
            source,
            Arc::clone(current.secondary()),
        ));

        let updater = GroupUpdater::new(&self.converters);
        let mut tracker = ValueTracker::new(&state.last_values, self.interceptor());
        let result = updater.update(&state.ordered_groups(), &*candidate, &mut tracker);
        let committed = tracker.into_committed();

        match result {
            Ok(()) => {
                state.last_values = committed;
                self.active.store(candidate);
                self.record_counts(state);
                info!(
                    source = %source_name,
                    groups = state.groups.len() + 1,
                    bindings = state.binding_count(),
                    "Refresh applied"
                );
                #[cfg(feature = "metrics")]
                if let (Some(metrics), Some(timer)) = (&self.metrics, timer) {
                    metrics.record_refresh_success(timer);
                }
                Ok(())
            }
            Err(err) => {
                if err.phase == RefreshPhase::Commit {
                    state.last_values.merge(committed);
                    self.record_counts(state);
                }
                warn!(
                    source = %source_name,
                    phase = %err.phase,
                    failed_groups = err.group_errors.len(),
                    "Refresh failed, keeping active source"
                );
                #[cfg(feature = "metrics")]
                if let (Some(metrics), Some(timer)) = (&self.metrics, timer) {
                    metrics.record_refresh_failure(timer, err.phase);
                }
                Err(err.into())
            }
        }
    }

    /// Remove every expired registration now, without refreshing.
    ///
    /// Returns the number of bindings removed.
    pub fn sweep_expired(&self) -> usize {
        let mut guard = self.state.lock();
        self.sweep(&mut guard)
    }

    fn sweep(&self, state: &mut ServiceState) -> usize {
        let mut swept = state.standalone.remove_expired();
        for group in &mut state.groups {
            swept.extend(group.remove_expired());
        }

        let (expired, live): (Vec<_>, Vec<_>) = state
            .groups
            .drain(..)
            .partition(ValueDefinitionGroup::is_expired);
        state.groups = live;
        for mut group in expired {
            debug!(group = group.name(), "Group expired");
            swept.extend(group.clear());
        }

        for binding in &swept {
            state.last_values.release(binding.id(), self.interceptor());
        }

        if !swept.is_empty() {
            warn!(removed = swept.len(), "Swept expired registrations");
            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.metrics {
                metrics.record_swept(swept.len());
            }
            self.record_counts(state);
        }
        swept.len()
    }

    /// Release every tracked value and drop every registration.
    ///
    /// The standalone group is emptied but stays in place, so the service
    /// can be used again afterwards.
    pub fn shutdown(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let released = state.last_values.release_all(self.interceptor());
        state.standalone.clear();
        let groups = state.groups.len();
        state.groups.clear();

        info!(released, groups, "Service shut down");
        self.record_counts(state);
    }

    /// Whether the active source has a value for `query`.
    pub fn is_available(&self, query: impl Into<Query>) -> bool {
        self.active.load().is_available(&query.into())
    }

    /// Retrieve and convert the single value for `query` from the active source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Source`] if the value is absent, ambiguous or
    /// does not convert.
    pub fn retrieve<T>(&self, query: impl Into<Query>) -> Result<T>
    where
        T: DeserializeOwned + Any + Send,
    {
        let source = self.active.load();
        Ok(self.converters.retrieve(&**source, &query.into())?)
    }

    /// Retrieve and convert every value for `query`. Absence gives an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Source`] if a value does not convert.
    pub fn retrieve_list<T>(&self, query: impl Into<Query>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Any + Send,
    {
        let source = self.active.load();
        Ok(self.converters.retrieve_list(&**source, &query.into())?)
    }

    /// The active source chain.
    pub fn active_source(&self) -> Arc<FallbackConfigurationSource> {
        self.active.load_full()
    }

    /// Id of the group holding standalone definitions.
    pub fn standalone_group_id(&self) -> GroupId {
        self.standalone_id
    }

    /// Number of registered groups, not counting the standalone group.
    pub fn group_count(&self) -> usize {
        self.counts.groups.load(Ordering::Acquire)
    }

    /// Number of registered bindings across all groups.
    pub fn binding_count(&self) -> usize {
        self.counts.bindings.load(Ordering::Acquire)
    }

    /// Number of values currently tracked for release.
    pub fn tracked_value_count(&self) -> usize {
        self.counts.tracked.load(Ordering::Acquire)
    }

    /// Publish the sizes of `state`. Called with the service lock held.
    fn record_counts(&self, state: &ServiceState) {
        let bindings = state.binding_count();
        self.counts.groups.store(state.groups.len(), Ordering::Release);
        self.counts.bindings.store(bindings, Ordering::Release);
        self.counts
            .tracked
            .store(state.last_values.len(), Ordering::Release);

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.update_binding_count(bindings);
        }
    }
}

impl Default for DeltaService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeltaService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaService")
            .field("active", &self.active.load().name())
            .field("converters", &self.converters.len())
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}
