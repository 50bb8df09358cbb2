//! Resolve and commit steps for single bindings and whole groups.

use super::action::{GroupChangeAction, ValueChangeAction};
use super::tracker::ValueTracker;
use crate::binding::{Binding, ValueDefinitionGroup};
use crate::error::{BoxError, GroupError, ValueAssignmentError, ValueResolutionError};
use crate::sources::{ConfigurationSource, ConverterRegistry};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// A listener panicked instead of returning an error.
#[derive(Debug, thiserror::Error)]
#[error("listener panicked: {0}")]
pub struct ListenerPanic(pub String);

pub(super) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run a listener call, turning a panic into an error.
fn guarded<F>(call: F) -> Result<(), (String, BoxError)>
where
    F: FnOnce() -> Result<(), BoxError>,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(cause)) => Err(("listener returned an error".to_string(), cause)),
        Err(payload) => {
            let panic = ListenerPanic(panic_message(payload));
            Err(("listener panicked".to_string(), Box::new(panic)))
        }
    }
}

/// Resolve the new value of `binding` from `source`. Invokes no listener.
///
/// # Errors
///
/// Returns a [`ValueResolutionError`] naming the binding when the source has
/// no value, has several, or the value does not convert.
pub fn resolve(
    binding: &Arc<dyn Binding>,
    source: &dyn ConfigurationSource,
    converters: &ConverterRegistry,
) -> Result<ValueChangeAction, ValueResolutionError> {
    let new_value = binding
        .resolve(source, converters)
        .map_err(|source| ValueResolutionError {
            descriptor: binding.descriptor().clone(),
            source,
        })?;

    Ok(ValueChangeAction {
        binding: Arc::clone(binding),
        new_value,
    })
}

/// Hand a resolved value to its listener.
///
/// The value passes through the interceptor first. On success the value the
/// listener held before is released; on failure the new value is released
/// and the old one stays tracked.
pub(crate) fn commit(
    action: ValueChangeAction,
    tracker: &mut ValueTracker<'_>,
) -> Result<(), ValueAssignmentError> {
    let ValueChangeAction { binding, new_value } = action;
    let id = binding.id();
    let old_value = tracker.previous(id);
    let value = tracker.created(new_value);

    let assigned = {
        let value = Arc::clone(&value);
        let old_value = old_value.clone();
        guarded(|| binding.assign(value, old_value))
    };

    match assigned {
        Ok(()) => {
            tracker.committed(id, value, old_value);
            Ok(())
        }
        Err((reason, cause)) => {
            tracker.discarded(value);
            Err(ValueAssignmentError {
                reason,
                descriptor: binding.descriptor().clone(),
                cause,
            })
        }
    }
}

/// Resolve every binding of `group`, in order.
///
/// # Errors
///
/// Stops at the first binding that fails and returns
/// [`GroupError::Discovery`] carrying that failure alone.
pub fn resolve_group<'g>(
    group: &'g ValueDefinitionGroup,
    source: &dyn ConfigurationSource,
    converters: &ConverterRegistry,
) -> Result<GroupChangeAction<'g>, GroupError> {
    let actions = group
        .values()
        .iter()
        .map(|binding| resolve(binding, source, converters))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| GroupError::Discovery {
            group: group.name().to_string(),
            error,
        })?;

    Ok(GroupChangeAction { group, actions })
}

/// Commit every value of a resolved group under the group's lock, then run
/// the group listener with `source`.
///
/// Assignment failures are collected rather than aborting; if there are any
/// the group listener is skipped.
pub(crate) fn commit_group(
    action: GroupChangeAction<'_>,
    source: &dyn ConfigurationSource,
    tracker: &mut ValueTracker<'_>,
) -> Result<(), GroupError> {
    let GroupChangeAction { group, actions } = action;
    let _guard = group.lock().lock();

    let errors: Vec<ValueAssignmentError> = actions
        .into_iter()
        .filter_map(|action| commit(action, tracker).err())
        .collect();

    if !errors.is_empty() {
        return Err(GroupError::Assignment {
            group: group.name().to_string(),
            errors,
        });
    }

    if let Some(listener) = group.listener() {
        guarded(|| listener.on_change(source)).map_err(|(_, cause)| {
            GroupError::ListenerInvocation {
                group: group.name().to_string(),
                cause,
            }
        })?;
    }

    Ok(())
}
