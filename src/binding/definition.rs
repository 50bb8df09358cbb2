//! Typed value definitions and their type-erased form.

use super::listener::{Expirable, ValueChangeListener, WeakTarget, WeakTargetListener};
use crate::error::{BoxError, SourceError};
use crate::sources::{ConfigurationSource, ConverterRegistry, Expression, Query};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A resolved value with its type erased.
pub type DynValue = Arc<dyn Any + Send + Sync>;

static NEXT_DEFINITION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`ValueDefinition`]. Clones of a definition share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionId(u64);

impl DefinitionId {
    fn next() -> Self {
        Self(NEXT_DEFINITION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a binding fetches, for diagnostics and error reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDescriptor {
    /// Name of the type handed to the listener
    pub type_name: &'static str,
    /// What the binding asks its source for
    pub query: Query,
    /// Whether the binding collects every matching value
    pub is_list: bool,
}

impl BindingDescriptor {
    /// Describe a binding.
    pub fn new(type_name: &'static str, query: Query, is_list: bool) -> Self {
        Self {
            type_name,
            query,
            is_list,
        }
    }

    /// The expression, unless the binding is resolved by type alone.
    pub fn expression(&self) -> Option<&Expression> {
        self.query.as_expression()
    }
}

impl fmt::Display for BindingDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_list {
            write!(f, "list {} from {}", self.type_name, self.query)
        } else {
            write!(f, "{} from {}", self.type_name, self.query)
        }
    }
}

/// A binding with its value type erased, as stored in groups.
///
/// [`ValueDefinition`] is the only implementation most callers need.
pub trait Binding: Send + Sync {
    /// Identity of the binding.
    fn id(&self) -> DefinitionId;

    /// What the binding fetches.
    fn descriptor(&self) -> &BindingDescriptor;

    /// Fetch and convert the binding's value. Invokes no listener.
    fn resolve(
        &self,
        source: &dyn ConfigurationSource,
        converters: &ConverterRegistry,
    ) -> Result<DynValue, SourceError>;

    /// Hand a resolved value to the listener.
    fn assign(&self, new_value: DynValue, old_value: Option<DynValue>) -> Result<(), BoxError>;

    /// Whether the registration should be swept.
    fn is_expired(&self) -> bool;
}

type Resolver<T> =
    fn(&dyn ConfigurationSource, &Query, &ConverterRegistry) -> Result<T, SourceError>;

fn resolve_single<T>(
    source: &dyn ConfigurationSource,
    query: &Query,
    converters: &ConverterRegistry,
) -> Result<T, SourceError>
where
    T: DeserializeOwned + Any + Send,
{
    converters.retrieve(source, query)
}

fn resolve_list<E>(
    source: &dyn ConfigurationSource,
    query: &Query,
    converters: &ConverterRegistry,
) -> Result<Vec<E>, SourceError>
where
    E: DeserializeOwned + Any + Send,
{
    converters.retrieve_list(source, query)
}

fn resolve_custom<T>(
    source: &dyn ConfigurationSource,
    query: &Query,
    converters: &ConverterRegistry,
) -> Result<T, SourceError>
where
    T: Any + Send,
{
    let raw = source.retrieve(query)?;
    converters.convert_registered(query, raw)
}

/// A typed slot bound to a listener.
///
/// The definition says what to fetch (an expression, or just the type) and
/// who to tell. It is immutable once built and identified by reference:
/// clones share one [`DefinitionId`].
///
/// # Examples
///
/// ```rust
/// use hotswap_bindings::binding::ValueDefinition;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI64, Ordering};
///
/// let port = Arc::new(AtomicI64::new(0));
/// let slot = Arc::clone(&port);
/// let definition = ValueDefinition::<i64>::new("server.port", move |new: Arc<i64>, _old| {
///     slot.store(*new, Ordering::SeqCst);
///     Ok(())
/// });
/// assert_eq!(definition.descriptor().type_name, "i64");
/// ```
pub struct ValueDefinition<T> {
    id: DefinitionId,
    descriptor: BindingDescriptor,
    resolver: Resolver<T>,
    listener: Arc<dyn ValueChangeListener<T>>,
    expiry: Option<Arc<dyn Expirable>>,
}

impl<T: Send + Sync + 'static> ValueDefinition<T> {
    fn build(
        query: Query,
        is_list: bool,
        resolver: Resolver<T>,
        listener: Arc<dyn ValueChangeListener<T>>,
    ) -> Self {
        Self {
            id: DefinitionId::next(),
            descriptor: BindingDescriptor::new(std::any::type_name::<T>(), query, is_list),
            resolver,
            listener,
            expiry: None,
        }
    }

    /// Attach an expiry check; the registration is swept once it reports true.
    pub fn expires_with(mut self, expiry: Arc<dyn Expirable>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Identity of this definition.
    pub fn id(&self) -> DefinitionId {
        self.id
    }

    /// What this definition fetches.
    pub fn descriptor(&self) -> &BindingDescriptor {
        &self.descriptor
    }

    /// The definition in the form stored by groups.
    pub fn to_binding(&self) -> Arc<dyn Binding> {
        Arc::new(self.clone())
    }
}

impl<T> ValueDefinition<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Bind the value at `expression`.
    pub fn new<F>(expression: impl Into<Expression>, listener: F) -> Self
    where
        F: Fn(Arc<T>, Option<Arc<T>>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::with_listener(Query::Expression(expression.into()), listener)
    }

    /// Bind the value the source holds for type `T`.
    pub fn of_type<F>(listener: F) -> Self
    where
        F: Fn(Arc<T>, Option<Arc<T>>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::with_listener(Query::of_type::<T>(), listener)
    }

    /// Bind `query` to any [`ValueChangeListener`].
    pub fn with_listener<L>(query: Query, listener: L) -> Self
    where
        L: ValueChangeListener<T> + 'static,
    {
        Self::build(query, false, resolve_single::<T>, Arc::new(listener))
    }

    /// Bind the value at `expression` to a target held weakly.
    ///
    /// The registration expires, and is swept, once `target` is dropped.
    pub fn weak<O, F>(expression: impl Into<Expression>, target: &Arc<O>, apply: F) -> Self
    where
        O: Send + Sync + 'static,
        F: Fn(&O, Arc<T>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let listener = WeakTargetListener::new(target, apply);
        Self::with_listener(Query::Expression(expression.into()), listener)
            .expires_with(Arc::new(WeakTarget::new(target)))
    }
}

impl<E> ValueDefinition<Vec<E>>
where
    E: DeserializeOwned + Send + Sync + 'static,
{
    /// Bind every value at `expression`. Absence yields an empty list.
    pub fn list<F>(expression: impl Into<Expression>, listener: F) -> Self
    where
        F: Fn(Arc<Vec<E>>, Option<Arc<Vec<E>>>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::build(
            Query::Expression(expression.into()),
            true,
            resolve_list::<E>,
            Arc::new(listener),
        )
    }

    /// Bind every value the source holds for type `E`.
    pub fn list_of_type<F>(listener: F) -> Self
    where
        F: Fn(Arc<Vec<E>>, Option<Arc<Vec<E>>>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::build(Query::of_type::<E>(), true, resolve_list::<E>, Arc::new(listener))
    }
}

impl<T> ValueDefinition<T>
where
    T: Send + Sync + 'static,
{
    /// Bind a type that only a registered converter can produce.
    ///
    /// Resolution fails with a conversion error when the service has no
    /// converter for `T`.
    pub fn custom<F>(query: impl Into<Query>, listener: F) -> Self
    where
        F: Fn(Arc<T>, Option<Arc<T>>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::build(query.into(), false, resolve_custom::<T>, Arc::new(listener))
    }
}

impl<T> Clone for ValueDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            descriptor: self.descriptor.clone(),
            resolver: self.resolver,
            listener: Arc::clone(&self.listener),
            expiry: self.expiry.clone(),
        }
    }
}

impl<T> fmt::Debug for ValueDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueDefinition")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("expires", &self.expiry.is_some())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Binding for ValueDefinition<T> {
    fn id(&self) -> DefinitionId {
        self.id
    }

    fn descriptor(&self) -> &BindingDescriptor {
        &self.descriptor
    }

    fn resolve(
        &self,
        source: &dyn ConfigurationSource,
        converters: &ConverterRegistry,
    ) -> Result<DynValue, SourceError> {
        let value = (self.resolver)(source, &self.descriptor.query, converters)?;
        Ok(Arc::new(value))
    }

    fn assign(&self, new_value: DynValue, old_value: Option<DynValue>) -> Result<(), BoxError> {
        let new_value = new_value.downcast::<T>().map_err(|_| {
            format!(
                "value handed to {} is not a {}",
                self.descriptor, self.descriptor.type_name
            )
        })?;
        let old_value = old_value.and_then(|old| old.downcast::<T>().ok());
        self.listener.on_change(new_value, old_value)
    }

    fn is_expired(&self) -> bool {
        self.expiry.as_ref().is_some_and(|expiry| expiry.is_expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::TreeSource;
    use parking_lot::Mutex;

    fn source() -> TreeSource {
        TreeSource::builder()
            .set("x", 1i64)
            .set("hosts", vec!["a", "b"])
            .bind_type::<String>("hosts")
            .build()
            .unwrap()
    }

    #[test]
    fn test_ids_are_unique_and_shared_by_clones() {
        let a = ValueDefinition::<i64>::new("x", |_, _| Ok(()));
        let b = ValueDefinition::<i64>::new("x", |_, _| Ok(()));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
        assert_eq!(a.id(), a.to_binding().id());
    }

    #[test]
    fn test_resolve_and_assign() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let definition = ValueDefinition::<i64>::new("x", move |new: Arc<i64>, old| {
            sink.lock().push((*new, old.map(|v| *v)));
            Ok(())
        });

        let value = definition
            .resolve(&source(), &ConverterRegistry::new())
            .unwrap();
        definition.assign(value, None).unwrap();
        assert_eq!(*seen.lock(), vec![(1, None)]);
    }

    #[test]
    fn test_list_definition() {
        let definition = ValueDefinition::<Vec<String>>::list("hosts", |_, _| Ok(()));
        assert!(definition.descriptor().is_list);

        let value = definition
            .resolve(&source(), &ConverterRegistry::new())
            .unwrap();
        let hosts = value.downcast::<Vec<String>>().unwrap();
        assert_eq!(*hosts, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_list_of_type_definition() {
        let definition = ValueDefinition::<Vec<String>>::list_of_type(|_, _| Ok(()));
        assert_eq!(definition.descriptor().expression(), None);

        let value = definition
            .resolve(&source(), &ConverterRegistry::new())
            .unwrap();
        assert_eq!(value.downcast::<Vec<String>>().unwrap().len(), 2);
    }

    #[test]
    fn test_assign_rejects_wrong_type() {
        let definition = ValueDefinition::<i64>::new("x", |_, _| Ok(()));
        let wrong: DynValue = Arc::new("text".to_string());
        assert!(definition.assign(wrong, None).is_err());
    }

    #[test]
    fn test_custom_requires_converter() {
        let definition = ValueDefinition::<std::time::Duration>::custom("x", |_, _| Ok(()));
        let mut converters = ConverterRegistry::new();
        assert!(definition.resolve(&source(), &converters).is_err());

        converters.register(|value: config::Value| {
            Ok(std::time::Duration::from_secs(value.into_int()? as u64))
        });
        assert!(definition.resolve(&source(), &converters).is_ok());
    }

    #[test]
    fn test_weak_definition_expires_with_target() {
        let target = Arc::new(Mutex::new(0i64));
        let definition = ValueDefinition::<i64>::weak("x", &target, |slot, value| {
            *slot.lock() = *value;
            Ok(())
        });
        assert!(!definition.is_expired());

        drop(target);
        assert!(definition.is_expired());
    }

    #[test]
    fn test_descriptor_display() {
        let definition = ValueDefinition::<i64>::new("/x", |_, _| Ok(()));
        assert_eq!(definition.descriptor().to_string(), "i64 from expression '/x'");
    }
}
