//! Last-value bookkeeping and interceptor pairing.

use super::DeltaValueInterceptor;
use super::operations::panic_message;
use crate::binding::{DefinitionId, DynValue};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::warn;

/// Run `created`, falling back to the resolved value if the interceptor panics.
fn intercept_created(interceptor: &dyn DeltaValueInterceptor, value: DynValue) -> DynValue {
    let resolved = Arc::clone(&value);
    match catch_unwind(AssertUnwindSafe(|| interceptor.created(value))) {
        Ok(value) => value,
        Err(payload) => {
            warn!(
                error = %panic_message(payload),
                "Interceptor panicked in created, keeping the resolved value"
            );
            resolved
        }
    }
}

/// Run `released`. A panic is logged; the value still counts as released.
fn intercept_released(interceptor: &dyn DeltaValueInterceptor, value: DynValue) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| interceptor.released(value))) {
        warn!(error = %panic_message(payload), "Interceptor panicked in released");
    }
}

/// The value each binding's listener last accepted, after interceptor substitution.
///
/// Owned by the service and cleared explicitly: an entry leaves the map when
/// its value is superseded, its registration is removed, or the service
/// shuts down. Every removal goes through [`release`](Self::release) so the
/// interceptor sees it.
#[derive(Default)]
pub(crate) struct LastValueMap {
    values: HashMap<DefinitionId, DynValue>,
}

impl LastValueMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, id: DefinitionId) -> Option<DynValue> {
        self.values.get(&id).cloned()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: DefinitionId) -> bool {
        self.values.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    /// Overlay `other` on this map. Values replaced here must already have
    /// been released by whoever superseded them.
    pub(crate) fn merge(&mut self, other: LastValueMap) {
        self.values.extend(other.values);
    }

    /// Drop the entry for `id`, handing its value to the interceptor.
    pub(crate) fn release(
        &mut self,
        id: DefinitionId,
        interceptor: Option<&dyn DeltaValueInterceptor>,
    ) -> bool {
        match self.values.remove(&id) {
            Some(value) => {
                if let Some(interceptor) = interceptor {
                    intercept_released(interceptor, value);
                }
                true
            }
            None => false,
        }
    }

    /// Drop every entry, handing each value to the interceptor.
    pub(crate) fn release_all(&mut self, interceptor: Option<&dyn DeltaValueInterceptor>) -> usize {
        let count = self.values.len();
        for (_, value) in self.values.drain() {
            if let Some(interceptor) = interceptor {
                intercept_released(interceptor, value);
            }
        }
        count
    }

    fn insert(&mut self, id: DefinitionId, value: DynValue) {
        self.values.insert(id, value);
    }
}

/// Collects the values committed during one refresh or registration.
///
/// Reads old values from the live map without touching it; the service
/// folds [`into_committed`](Self::into_committed) back in once it knows the
/// outcome.
pub(crate) struct ValueTracker<'a> {
    previous: &'a LastValueMap,
    committed: LastValueMap,
    interceptor: Option<&'a dyn DeltaValueInterceptor>,
}

impl<'a> ValueTracker<'a> {
    pub(crate) fn new(
        previous: &'a LastValueMap,
        interceptor: Option<&'a dyn DeltaValueInterceptor>,
    ) -> Self {
        Self {
            previous,
            committed: LastValueMap::new(),
            interceptor,
        }
    }

    /// The value `id`'s listener currently holds, if any.
    pub(crate) fn previous(&self, id: DefinitionId) -> Option<DynValue> {
        self.committed.get(id).or_else(|| self.previous.get(id))
    }

    /// Run a freshly resolved value through the interceptor.
    pub(crate) fn created(&self, value: DynValue) -> DynValue {
        match self.interceptor {
            Some(interceptor) => intercept_created(interceptor, value),
            None => value,
        }
    }

    /// Record `value` as accepted and release what it replaced.
    ///
    /// `value` is tracked before the interceptor sees `superseded`.
    pub(crate) fn committed(
        &mut self,
        id: DefinitionId,
        value: DynValue,
        superseded: Option<DynValue>,
    ) {
        self.committed.insert(id, value);
        if let Some(old) = superseded {
            self.discarded(old);
        }
    }

    /// Release a value that will not be tracked.
    pub(crate) fn discarded(&self, value: DynValue) {
        if let Some(interceptor) = self.interceptor {
            intercept_released(interceptor, value);
        }
    }

    #[cfg(test)]
    pub(crate) fn committed_count(&self) -> usize {
        self.committed.len()
    }

    pub(crate) fn into_committed(self) -> LastValueMap {
        self.committed
    }

    /// Release everything committed so far; used when the work is abandoned.
    pub(crate) fn release_committed(mut self) -> usize {
        self.committed.release_all(self.interceptor)
    }
}
