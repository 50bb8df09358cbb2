//! The value binding model: what to fetch and who to tell.
//!
//! A [`ValueDefinition`] binds one typed slot to a listener. A
//! [`ValueDefinitionGroup`] updates several of them under one lock and runs an
//! optional listener once the whole set has been assigned.

mod definition;
mod group;
mod listener;

pub use definition::{Binding, BindingDescriptor, DefinitionId, DynValue, ValueDefinition};
pub use group::{
    GroupId, GroupLock, STANDALONE_GROUP, ValueDefinitionGroup, ValueDefinitionGroupBuilder,
};
pub use listener::{Expirable, GroupChangeListener, ValueChangeListener, WeakTarget};
