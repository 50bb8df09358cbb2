//! Listener and expiry capabilities supplied by callers.

use crate::error::BoxError;
use crate::sources::ConfigurationSource;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Receives every new value of a binding.
///
/// `old_value` is the value this listener last accepted, or `None` before
/// the first commit.
///
/// Closures of the shape `Fn(Arc<T>, Option<Arc<T>>) -> Result<(), BoxError>`
/// implement this trait.
pub trait ValueChangeListener<T>: Send + Sync {
    /// Handle a new value.
    ///
    /// # Errors
    ///
    /// A returned error is reported as a
    /// [`ValueAssignmentError`](crate::error::ValueAssignmentError); it
    /// never stops the other bindings of the refresh from being assigned.
    fn on_change(&self, new_value: Arc<T>, old_value: Option<Arc<T>>) -> Result<(), BoxError>;
}

impl<T, F> ValueChangeListener<T> for F
where
    F: Fn(Arc<T>, Option<Arc<T>>) -> Result<(), BoxError> + Send + Sync,
{
    fn on_change(&self, new_value: Arc<T>, old_value: Option<Arc<T>>) -> Result<(), BoxError> {
        self(new_value, old_value)
    }
}

/// Runs once per group update, after every value of the group was assigned.
pub trait GroupChangeListener: Send + Sync {
    /// Handle a completed group update. `source` is the source the values
    /// were resolved from.
    fn on_change(&self, source: &dyn ConfigurationSource) -> Result<(), BoxError>;
}

impl<F> GroupChangeListener for F
where
    F: Fn(&dyn ConfigurationSource) -> Result<(), BoxError> + Send + Sync,
{
    fn on_change(&self, source: &dyn ConfigurationSource) -> Result<(), BoxError> {
        self(source)
    }
}

/// Tells the service a registration has outlived its purpose.
///
/// Expired registrations are swept before every refresh.
pub trait Expirable: Send + Sync {
    /// Whether the registration should be removed.
    fn is_expired(&self) -> bool;
}

impl<F> Expirable for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_expired(&self) -> bool {
        self()
    }
}

/// Expires once the target it watches has been dropped.
pub struct WeakTarget<O> {
    target: Weak<O>,
}

impl<O> WeakTarget<O> {
    /// Watch `target` without keeping it alive.
    pub fn new(target: &Arc<O>) -> Self {
        Self {
            target: Arc::downgrade(target),
        }
    }
}

impl<O: Send + Sync> Expirable for WeakTarget<O> {
    fn is_expired(&self) -> bool {
        self.target.strong_count() == 0
    }
}

/// Applies new values to a weakly held target; a no-op once it is gone.
pub(crate) struct WeakTargetListener<O, T, F> {
    target: Weak<O>,
    apply: F,
    _value: PhantomData<fn(Arc<T>)>,
}

impl<O, T, F> WeakTargetListener<O, T, F> {
    pub(crate) fn new(target: &Arc<O>, apply: F) -> Self {
        Self {
            target: Arc::downgrade(target),
            apply,
            _value: PhantomData,
        }
    }
}

impl<O, T, F> ValueChangeListener<T> for WeakTargetListener<O, T, F>
where
    O: Send + Sync,
    F: Fn(&O, Arc<T>) -> Result<(), BoxError> + Send + Sync,
{
    fn on_change(&self, new_value: Arc<T>, _old_value: Option<Arc<T>>) -> Result<(), BoxError> {
        match self.target.upgrade() {
            Some(target) => (self.apply)(&target, new_value),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_weak_target_expiry() {
        let target = Arc::new(5u32);
        let expiry = WeakTarget::new(&target);
        assert!(!expiry.is_expired());

        drop(target);
        assert!(expiry.is_expired());
    }

    #[test]
    fn test_weak_listener_stops_after_drop() {
        let target = Arc::new(Mutex::new(0i64));
        let listener = WeakTargetListener::new(&target, |slot: &Mutex<i64>, value: Arc<i64>| {
            *slot.lock() = *value;
            Ok(())
        });

        listener.on_change(Arc::new(7), None).unwrap();
        assert_eq!(*target.lock(), 7);

        drop(target);
        assert!(listener.on_change(Arc::new(8), None).is_ok());
    }

    #[test]
    fn test_closure_expiry() {
        let expiry = || true;
        assert!(Expirable::is_expired(&expiry));
    }
}
