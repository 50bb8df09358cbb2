//! Two-phase update of every registered group.

use super::action::GroupChangeAction;
use super::operations::{commit_group, resolve_group};
use super::tracker::ValueTracker;
use crate::binding::ValueDefinitionGroup;
use crate::error::{RefreshError, RefreshPhase};
use crate::sources::{ConfigurationSource, ConverterRegistry};
use tracing::debug;

/// Runs discovery over all groups, then commit over all groups.
///
/// Discovery is all-or-nothing: one failing group means no listener runs.
/// Commit is best-effort: every group is attempted and failures collected.
pub(crate) struct GroupUpdater<'a> {
    converters: &'a ConverterRegistry,
}

impl<'a> GroupUpdater<'a> {
    pub(crate) fn new(converters: &'a ConverterRegistry) -> Self {
        Self { converters }
    }

    /// Resolve every group against `source`, in the given order.
    ///
    /// Every group is visited even after one fails, so the error lists all
    /// groups with bad bindings.
    pub(crate) fn discover<'g>(
        &self,
        groups: &[&'g ValueDefinitionGroup],
        source: &dyn ConfigurationSource,
    ) -> Result<Vec<GroupChangeAction<'g>>, RefreshError> {
        let mut actions = Vec::with_capacity(groups.len());
        let mut group_errors = Vec::new();

        for &group in groups {
            match resolve_group(group, source, self.converters) {
                Ok(action) => {
                    debug!(group = group.name(), values = group.len(), "Group discovered");
                    actions.push(action);
                }
                Err(err) => {
                    debug!(group = group.name(), error = %err, "Group discovery failed");
                    group_errors.push(err);
                }
            }
        }

        if group_errors.is_empty() {
            Ok(actions)
        } else {
            Err(RefreshError {
                phase: RefreshPhase::Discovery,
                group_errors,
            })
        }
    }

    /// Commit resolved groups in order, continuing past failures.
    pub(crate) fn commit(
        &self,
        actions: Vec<GroupChangeAction<'_>>,
        source: &dyn ConfigurationSource,
        tracker: &mut ValueTracker<'_>,
    ) -> Result<(), RefreshError> {
        let mut group_errors = Vec::new();

        for action in actions {
            let name = action.group().name();
            match commit_group(action, source, tracker) {
                Ok(()) => debug!(group = name, "Group committed"),
                Err(err) => {
                    debug!(group = name, error = %err, "Group commit failed");
                    group_errors.push(err);
                }
            }
        }

        if group_errors.is_empty() {
            Ok(())
        } else {
            Err(RefreshError {
                phase: RefreshPhase::Commit,
                group_errors,
            })
        }
    }

    /// Discover, then commit only if discovery succeeded for every group.
    pub(crate) fn update(
        &self,
        groups: &[&ValueDefinitionGroup],
        source: &dyn ConfigurationSource,
        tracker: &mut ValueTracker<'_>,
    ) -> Result<(), RefreshError> {
        let actions = self.discover(groups, source)?;
        self.commit(actions, source, tracker)
    }
}
