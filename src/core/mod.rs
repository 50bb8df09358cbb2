//! The change-propagation service and its builder.

mod builder;
mod service;

pub use builder::DeltaServiceBuilder;
pub use service::DeltaService;
