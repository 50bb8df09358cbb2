//! Configuration source capability and implementations.

mod configuration_source;
mod convert;
mod fallback;
mod tree;

pub use configuration_source::{ConfigurationSource, Expression, NONE, NoSource, Query, TypeTag, none};
pub use convert::ConverterRegistry;
pub use fallback::FallbackConfigurationSource;
pub use tree::{TreeSource, TreeSourceBuilder};
