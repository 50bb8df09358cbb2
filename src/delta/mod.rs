//! Change propagation: resolving new values and committing them to listeners.
//!
//! A refresh runs in two phases. Discovery resolves every binding of every
//! group without invoking a listener; if any group fails, nothing is
//! committed. Commit then hands the values to listeners group by group,
//! each group under its own lock, collecting failures instead of stopping.

mod action;
mod interceptor;
mod operations;
pub(crate) mod tracker;
mod updater;

pub use action::{GroupChangeAction, ValueChangeAction};
pub use interceptor::DeltaValueInterceptor;
pub use operations::{ListenerPanic, resolve, resolve_group};

pub(crate) use operations::{commit, commit_group};
pub(crate) use tracker::{LastValueMap, ValueTracker};
pub(crate) use updater::GroupUpdater;
