//! Refresh metrics tracking using OpenTelemetry.

use crate::error::RefreshPhase;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector for change propagation.
///
/// Tracks refresh attempts, success and failure rates (failures labelled by
/// phase), refresh latency, the number of registered bindings and the age of
/// the active source.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_bindings::metrics::DeltaMetrics;
/// use opentelemetry::global;
///
/// let meter = global::meter("hotswap-bindings");
/// let metrics = DeltaMetrics::new(meter);
///
/// let timer = metrics.start_refresh();
/// // ... run the refresh ...
/// metrics.record_refresh_success(timer);
/// ```
#[derive(Clone)]
pub struct DeltaMetrics {
    refresh_attempts: Counter<u64>,
    refresh_success: Counter<u64>,
    refresh_failures: Counter<u64>,
    refresh_duration: Histogram<f64>,
    swept_registrations: Counter<u64>,
    source_age_seconds: Gauge<i64>,
    registered_bindings: Gauge<i64>,
    last_swap: Arc<parking_lot::Mutex<Instant>>,
}

impl DeltaMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let refresh_attempts = meter
            .u64_counter("hotswap_bindings.refresh.attempts")
            .with_description("Total number of refresh attempts")
            .build();

        let refresh_success = meter
            .u64_counter("hotswap_bindings.refresh.success")
            .with_description("Number of refreshes that swapped the active source")
            .build();

        let refresh_failures = meter
            .u64_counter("hotswap_bindings.refresh.failures")
            .with_description("Number of failed refreshes, by phase")
            .build();

        let refresh_duration = meter
            .f64_histogram("hotswap_bindings.refresh.duration")
            .with_description("Duration of refresh operations in seconds")
            .with_unit("s")
            .build();

        let swept_registrations = meter
            .u64_counter("hotswap_bindings.sweep.removed")
            .with_description("Number of expired registrations removed")
            .build();

        let source_age_seconds = meter
            .i64_gauge("hotswap_bindings.source.age")
            .with_description("Time since the active source was swapped in seconds")
            .with_unit("s")
            .build();

        let registered_bindings = meter
            .i64_gauge("hotswap_bindings.bindings.registered")
            .with_description("Number of registered bindings across all groups")
            .build();

        Self {
            refresh_attempts,
            refresh_success,
            refresh_failures,
            refresh_duration,
            swept_registrations,
            source_age_seconds,
            registered_bindings,
            last_swap: Arc::new(parking_lot::Mutex::new(Instant::now())),
        }
    }

    /// Start a refresh timer.
    ///
    /// Pass the returned `Instant` to `record_refresh_success` or
    /// `record_refresh_failure` once the refresh completes.
    pub fn start_refresh(&self) -> Instant {
        self.refresh_attempts.add(1, &[]);
        Instant::now()
    }

    /// Record a refresh that swapped the active source.
    pub fn record_refresh_success(&self, start: Instant) {
        self.refresh_success.add(1, &[]);
        self.refresh_duration.record(start.elapsed().as_secs_f64(), &[]);
        *self.last_swap.lock() = Instant::now();
    }

    /// Record a refresh that failed in `phase`.
    pub fn record_refresh_failure(&self, start: Instant, phase: RefreshPhase) {
        let labels = [KeyValue::new("phase", phase.to_string())];
        self.refresh_failures.add(1, &labels);
        self.refresh_duration.record(start.elapsed().as_secs_f64(), &labels);
    }

    /// Record registrations removed by an expiry sweep.
    pub fn record_swept(&self, count: usize) {
        if count > 0 {
            self.swept_registrations.add(count as u64, &[]);
        }
    }

    /// Update the number of registered bindings.
    pub fn update_binding_count(&self, count: usize) {
        self.registered_bindings.record(count as i64, &[]);
    }

    /// Update the source age metric.
    ///
    /// Call periodically to track how stale the active source is.
    pub fn update_source_age(&self) {
        let age_secs = self.last_swap.lock().elapsed().as_secs() as i64;
        self.source_age_seconds.record(age_secs, &[]);
    }
}
