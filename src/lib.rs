//! # hotswap-bindings
//!
//! Live configuration bindings with two-phase, all-or-nothing change propagation.
//!
//! ## Overview
//!
//! Application code binds typed values and groups of values to listeners
//! once. When a new configuration snapshot arrives, `hotswap-bindings`
//! re-resolves every binding against it and hands the new values to the
//! listeners, without restarting the process:
//! - Discovery resolves every binding first; if anything fails, no listener runs
//! - Groups commit under their own lock, so readers sharing it never see half an update
//! - The active source is swapped atomically using `arc-swap`
//! - An optional interceptor sees every value created and released
//!
//! ## Quick Start
//!
//! ```rust
//! use hotswap_bindings::prelude::*;
//! use parking_lot::Mutex;
//! use serde::Deserialize;
//! use std::sync::Arc;
//!
//! #[derive(Debug, Deserialize, Clone, PartialEq)]
//! struct Pool {
//!     size: u32,
//!     url: String,
//! }
//!
//! # fn example() -> hotswap_bindings::error::Result<()> {
//! let initial = TreeSource::builder()
//!     .set("db.pool.size", 4i64)
//!     .set("db.pool.url", "postgres://primary")
//!     .build()?;
//!
//! let service = DeltaService::builder()
//!     .with_source(Arc::new(initial))
//!     .build();
//!
//! let pool = Arc::new(Mutex::new(None));
//! let target = Arc::clone(&pool);
//! let definition = ValueDefinition::<Pool>::new("db.pool", move |new: Arc<Pool>, _old| {
//!     *target.lock() = Some((*new).clone());
//!     Ok(())
//! });
//!
//! let group = ValueDefinitionGroup::builder("database")
//!     .value(&definition)
//!     .on_change(|_source| Ok(()))
//!     .build();
//! service.register_group(group, true)?;
//!
//! // Later, when the configuration changes
//! let updated = TreeSource::builder()
//!     .set("db.pool.size", 8i64)
//!     .set("db.pool.url", "postgres://primary")
//!     .build()?;
//! service.refresh(Arc::new(updated))?;
//!
//! assert_eq!(pool.lock().as_ref().map(|p| p.size), Some(8));
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Atomic discovery**: a refresh either resolves every binding or changes nothing
//! - **Group locking**: values and the group listener commit under one re-entrant lock
//! - **Fallback chain**: a defaults source stays behind every refreshed source
//! - **Expiry**: registrations bound to dropped targets clean themselves up
//! - **Snapshots**: file-backed snapshots with a last good copy
//! - **File watching**: automatic refresh on file changes
//! - **Metrics**: OpenTelemetry refresh metrics
//!
//! ## Feature Flags
//!
//! Enable optional features in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! hotswap-bindings = { version = "0.1", features = ["metrics"] }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod binding;
pub mod core;
pub mod delta;
pub mod error;
pub mod snapshot;
pub mod sources;

#[cfg(feature = "file-watch")]
pub mod notify;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::binding::{GroupLock, ValueDefinition, ValueDefinitionGroup};
    pub use crate::core::{DeltaService, DeltaServiceBuilder};
    pub use crate::delta::DeltaValueInterceptor;
    pub use crate::error::{ConfigError, RefreshError, RefreshPhase, Result};
    pub use crate::sources::{ConfigurationSource, FallbackConfigurationSource, Query, TreeSource};
}
