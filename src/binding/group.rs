//! Groups of bindings updated together under one lock.

use super::definition::{Binding, DefinitionId, ValueDefinition};
use super::listener::{Expirable, GroupChangeListener};
use crate::error::BoxError;
use crate::sources::ConfigurationSource;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Name of the group that holds ungrouped registrations.
pub const STANDALONE_GROUP: &str = "standalone";

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl GroupId {
    fn next() -> Self {
        Self(NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// Mutual-exclusion handle of a group.
///
/// Held while the group's values are assigned and its listener runs. Code
/// outside the service that takes the same lock never observes the group's
/// target half updated. The lock is re-entrant, so listeners may take it
/// again on the committing thread.
#[derive(Clone, Default)]
pub struct GroupLock {
    inner: Arc<ReentrantMutex<()>>,
}

impl GroupLock {
    /// Create a new, unshared lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is held.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.lock()
    }

    /// Take the lock if it is free.
    pub fn try_lock(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        self.inner.try_lock()
    }

    /// Whether both handles guard the same lock.
    pub fn same_as(&self, other: &GroupLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for GroupLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupLock")
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

/// A named, ordered set of bindings with an optional post-update listener.
///
/// Values are committed in insertion order, under the group's lock, and the
/// group listener runs once after all of them.
///
/// # Examples
///
/// ```rust
/// use hotswap_bindings::binding::{ValueDefinition, ValueDefinitionGroup};
///
/// let url = ValueDefinition::<String>::new("db.url", |_, _| Ok(()));
/// let size = ValueDefinition::<u32>::new("db.pool_size", |_, _| Ok(()));
///
/// let group = ValueDefinitionGroup::builder("database")
///     .value(&url)
///     .value(&size)
///     .on_change(|_source| Ok(()))
///     .build();
///
/// assert_eq!(group.len(), 2);
/// assert!(group.has_listener());
/// ```
pub struct ValueDefinitionGroup {
    id: GroupId,
    name: String,
    values: Vec<Arc<dyn Binding>>,
    listener: Option<Arc<dyn GroupChangeListener>>,
    expiry: Option<Arc<dyn Expirable>>,
    lock: GroupLock,
}

impl ValueDefinitionGroup {
    /// Start building a group.
    pub fn builder(name: impl Into<String>) -> ValueDefinitionGroupBuilder {
        ValueDefinitionGroupBuilder::new(name)
    }

    /// The group holding ungrouped registrations.
    pub(crate) fn standalone() -> Self {
        Self::builder(STANDALONE_GROUP).build()
    }

    /// Identity of the group.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Name of the group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bindings in commit order.
    pub fn values(&self) -> &[Arc<dyn Binding>] {
        &self.values
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the group has no bindings.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether a binding with `id` belongs to the group.
    pub fn contains(&self, id: DefinitionId) -> bool {
        self.values.iter().any(|value| value.id() == id)
    }

    /// The group's mutual-exclusion handle.
    pub fn lock(&self) -> &GroupLock {
        &self.lock
    }

    /// The post-update listener.
    pub fn listener(&self) -> Option<&Arc<dyn GroupChangeListener>> {
        self.listener.as_ref()
    }

    /// Whether the group has a post-update listener.
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Whether the group's expiry check reports it gone.
    pub fn is_expired(&self) -> bool {
        self.expiry.as_ref().is_some_and(|expiry| expiry.is_expired())
    }

    /// Append `binding` unless it is already present.
    pub(crate) fn insert(&mut self, binding: Arc<dyn Binding>) -> bool {
        if self.contains(binding.id()) {
            return false;
        }
        self.values.push(binding);
        true
    }

    pub(crate) fn remove(&mut self, id: DefinitionId) -> Option<Arc<dyn Binding>> {
        let index = self.values.iter().position(|value| value.id() == id)?;
        Some(self.values.remove(index))
    }

    /// Remove and return every expired binding.
    pub(crate) fn remove_expired(&mut self) -> Vec<Arc<dyn Binding>> {
        let (expired, live) = self
            .values
            .drain(..)
            .partition(|value| value.is_expired());
        self.values = live;
        expired
    }

    pub(crate) fn clear(&mut self) -> Vec<Arc<dyn Binding>> {
        std::mem::take(&mut self.values)
    }
}

impl fmt::Debug for ValueDefinitionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueDefinitionGroup")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("values", &self.values.len())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

/// Builder for a [`ValueDefinitionGroup`].
pub struct ValueDefinitionGroupBuilder {
    name: String,
    values: Vec<Arc<dyn Binding>>,
    listener: Option<Arc<dyn GroupChangeListener>>,
    expiry: Option<Arc<dyn Expirable>>,
    lock: Option<GroupLock>,
}

impl ValueDefinitionGroupBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            listener: None,
            expiry: None,
            lock: None,
        }
    }

    /// Add a definition. Adding the same definition twice keeps the first position.
    pub fn value<T: Send + Sync + 'static>(self, definition: &ValueDefinition<T>) -> Self {
        self.binding(definition.to_binding())
    }

    /// Add an already erased binding.
    pub fn binding(mut self, binding: Arc<dyn Binding>) -> Self {
        if !self.values.iter().any(|value| value.id() == binding.id()) {
            self.values.push(binding);
        }
        self
    }

    /// Run `listener` after every update of the group.
    pub fn on_change<F>(self, listener: F) -> Self
    where
        F: Fn(&dyn ConfigurationSource) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.listener(listener)
    }

    /// Use any [`GroupChangeListener`] as the post-update listener.
    pub fn listener<L: GroupChangeListener + 'static>(mut self, listener: L) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Sweep the whole group once `expiry` reports true.
    pub fn expires_with(mut self, expiry: Arc<dyn Expirable>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Share `lock` with code outside the service. Defaults to a private lock.
    pub fn lock(mut self, lock: GroupLock) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Build the group.
    pub fn build(self) -> ValueDefinitionGroup {
        ValueDefinitionGroup {
            id: GroupId::next(),
            name: self.name,
            values: self.values,
            listener: self.listener,
            expiry: self.expiry,
            lock: self.lock.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn definition() -> ValueDefinition<i64> {
        ValueDefinition::new("x", |_, _| Ok(()))
    }

    #[test]
    fn test_values_keep_insertion_order_without_duplicates() {
        let a = definition();
        let b = definition();
        let group = ValueDefinitionGroup::builder("g")
            .value(&b)
            .value(&a)
            .value(&b)
            .build();

        let ids: Vec<_> = group.values().iter().map(|value| value.id()).collect();
        assert_eq!(ids, vec![b.id(), a.id()]);
    }

    #[test]
    fn test_default_lock_is_private() {
        let first = ValueDefinitionGroup::builder("a").build();
        let second = ValueDefinitionGroup::builder("b").build();
        assert!(!first.lock().same_as(second.lock()));
    }

    #[test]
    fn test_shared_lock() {
        let lock = GroupLock::new();
        let group = ValueDefinitionGroup::builder("g").lock(lock.clone()).build();
        assert!(group.lock().same_as(&lock));

        let _held = lock.lock();
        // Re-entrant on the same thread
        assert!(group.lock().try_lock().is_some());
    }

    #[test]
    fn test_insert_remove() {
        let mut group = ValueDefinitionGroup::standalone();
        assert_eq!(group.name(), STANDALONE_GROUP);
        assert!(!group.has_listener());

        let a = definition();
        assert!(group.insert(a.to_binding()));
        assert!(!group.insert(a.to_binding()));
        assert!(group.contains(a.id()));

        assert!(group.remove(a.id()).is_some());
        assert!(group.is_empty());
        assert!(group.remove(a.id()).is_none());
    }

    #[test]
    fn test_remove_expired() {
        let flag = Arc::new(AtomicBool::new(false));
        let watched = Arc::clone(&flag);
        let expiring = definition()
            .expires_with(Arc::new(move || watched.load(Ordering::SeqCst)));
        let steady = definition();

        let mut group = ValueDefinitionGroup::standalone();
        group.insert(expiring.to_binding());
        group.insert(steady.to_binding());
        assert!(group.remove_expired().is_empty());

        flag.store(true, Ordering::SeqCst);
        let removed = group.remove_expired();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id(), expiring.id());
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_group_expiry() {
        let group = ValueDefinitionGroup::builder("g")
            .expires_with(Arc::new(|| true))
            .build();
        assert!(group.is_expired());
    }
}
