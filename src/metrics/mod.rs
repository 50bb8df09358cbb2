//! Built-in metrics for change propagation.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Refresh attempts/success/failures (failures labelled by phase)
//! - Refresh duration
//! - Expired registrations swept
//! - Registered bindings
//! - Active source age
//!
//! # Examples
//!
//! ```rust,no_run
//! use hotswap_bindings::prelude::*;
//! use opentelemetry::global;
//!
//! let service = DeltaService::builder()
//!     .with_metrics(global::meter("my-app"))
//!     .build();
//! ```

mod delta_metrics;

pub use delta_metrics::DeltaMetrics;
