//! Hook observing the lifecycle of values handed to listeners.

use crate::binding::DynValue;

/// Observes the lifecycle of every value handed to a listener.
///
/// `created` runs once per resolved value before the listener sees it and
/// may return a substitute of the same type (a wrapper, a pooled instance).
/// Each value returned from `created` is later passed to `released` exactly
/// once: when it is superseded by a newer value, when its listener refused
/// it, or when its registration is removed or the service shuts down.
///
/// Within one commit the calls are ordered: `created(new)`, then the
/// listener, then `released(old)` once the listener accepted `new`. If the
/// listener refuses, `released(new)` follows instead and `old` stays tracked.
///
/// A panic in either hook is caught and logged. A panicking `created`
/// leaves the resolved value in place; a value whose `released` panicked
/// counts as released.
///
/// # Examples
///
/// ```rust
/// use hotswap_bindings::binding::DynValue;
/// use hotswap_bindings::delta::DeltaValueInterceptor;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct LiveValues(AtomicUsize);
///
/// impl DeltaValueInterceptor for LiveValues {
///     fn created(&self, value: DynValue) -> DynValue {
///         self.0.fetch_add(1, Ordering::SeqCst);
///         value
///     }
///
///     fn released(&self, _value: DynValue) {
///         self.0.fetch_sub(1, Ordering::SeqCst);
///     }
/// }
/// ```
pub trait DeltaValueInterceptor: Send + Sync {
    /// A new value is about to reach a listener.
    fn created(&self, value: DynValue) -> DynValue;

    /// A value previously returned from [`created`](Self::created) is no
    /// longer in use by the service.
    fn released(&self, value: DynValue);
}
