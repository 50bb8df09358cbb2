//! Records passed from discovery to commit.

use crate::binding::{Binding, DynValue, ValueDefinitionGroup};
use std::fmt;
use std::sync::Arc;

/// A resolved value waiting to be handed to its binding's listener.
pub struct ValueChangeAction {
    pub(crate) binding: Arc<dyn Binding>,
    pub(crate) new_value: DynValue,
}

impl ValueChangeAction {
    /// The binding the value is for.
    pub fn binding(&self) -> &Arc<dyn Binding> {
        &self.binding
    }

    /// The resolved value, before any interceptor substitution.
    pub fn new_value(&self) -> &DynValue {
        &self.new_value
    }
}

impl fmt::Debug for ValueChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueChangeAction")
            .field("binding", self.binding.descriptor())
            .finish()
    }
}

/// Every resolved value of one group, in the group's commit order.
pub struct GroupChangeAction<'g> {
    pub(crate) group: &'g ValueDefinitionGroup,
    pub(crate) actions: Vec<ValueChangeAction>,
}

impl<'g> GroupChangeAction<'g> {
    /// The group the values were resolved for.
    pub fn group(&self) -> &'g ValueDefinitionGroup {
        self.group
    }

    /// The resolved values.
    pub fn actions(&self) -> &[ValueChangeAction] {
        &self.actions
    }
}

impl fmt::Debug for GroupChangeAction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupChangeAction")
            .field("group", &self.group.name())
            .field("actions", &self.actions.len())
            .finish()
    }
}
