//! Builder for constructing DeltaService instances.

use crate::core::DeltaService;
use crate::delta::DeltaValueInterceptor;
use crate::error::BoxError;
use crate::sources::{ConfigurationSource, ConverterRegistry, FallbackConfigurationSource, none};
use std::any::Any;
use std::sync::Arc;

#[cfg(feature = "metrics")]
use crate::metrics::DeltaMetrics;

/// Builder for constructing a [`DeltaService`].
///
/// # Examples
///
/// ```rust
/// use hotswap_bindings::prelude::*;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> Result<()> {
/// let defaults = TreeSource::builder().set("timeout_ms", 500i64).build()?;
///
/// let service = DeltaService::builder()
///     .with_defaults(Arc::new(defaults))
///     .with_converter(|value: config::Value| {
///         Ok(Duration::from_millis(value.into_int()? as u64))
///     })
///     .build();
///
/// let timeout: Duration = service.retrieve("timeout_ms")?;
/// assert_eq!(timeout, Duration::from_millis(500));
/// # Ok(())
/// # }
/// ```
pub struct DeltaServiceBuilder {
    primary: Option<Arc<dyn ConfigurationSource>>,
    defaults: Option<Arc<dyn ConfigurationSource>>,
    interceptor: Option<Arc<dyn DeltaValueInterceptor>>,
    converters: ConverterRegistry,
    #[cfg(feature = "metrics")]
    metrics: Option<DeltaMetrics>,
}

impl DeltaServiceBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            primary: None,
            defaults: None,
            interceptor: None,
            converters: ConverterRegistry::new(),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Set the initial source. Replaced by every successful refresh.
    pub fn with_source(mut self, source: Arc<dyn ConfigurationSource>) -> Self {
        self.primary = Some(source);
        self
    }

    /// Set the fallback consulted when the active source has no value.
    ///
    /// The fallback is kept across refreshes.
    pub fn with_defaults(mut self, source: Arc<dyn ConfigurationSource>) -> Self {
        self.defaults = Some(source);
        self
    }

    /// Observe the creation and release of every value handed to a listener.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn DeltaValueInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Register the converter for `T`. It takes precedence over serde.
    pub fn with_converter<T, F>(mut self, converter: F) -> Self
    where
        T: Any + Send,
        F: Fn(config::Value) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.converters.register(converter);
        self
    }

    /// Use a prepared converter registry, replacing converters added so far.
    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    /// Enable OpenTelemetry metrics collection.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use hotswap_bindings::prelude::*;
    /// use opentelemetry::global;
    ///
    /// let service = DeltaService::builder()
    ///     .with_metrics(global::meter("my-app"))
    ///     .build();
    /// ```
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, meter: opentelemetry::metrics::Meter) -> Self {
        self.metrics = Some(DeltaMetrics::new(meter));
        self
    }

    /// Build the service.
    pub fn build(self) -> DeltaService {
        let source = FallbackConfigurationSource::new(
            self.primary.unwrap_or_else(none),
            self.defaults.unwrap_or_else(none),
        );

        DeltaService::from_parts(
            source,
            self.converters,
            self.interceptor,
            #[cfg(feature = "metrics")]
            self.metrics,
        )
    }
}

impl Default for DeltaServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::TreeSource;

    #[test]
    fn test_defaults_are_empty() {
        let service = DeltaServiceBuilder::new().build();
        let active = service.active_source();
        assert_eq!(active.name(), "none -> none");
        assert!(!service.is_available("anything"));
    }

    #[test]
    fn test_builder_accumulates_converters() {
        let builder = DeltaServiceBuilder::new()
            .with_converter(|value: config::Value| Ok(value.into_int()? as u8))
            .with_converter(|value: config::Value| Ok(value.into_bool()?));
        assert_eq!(builder.converters.len(), 2);
    }

    #[test]
    fn test_source_in_front_of_defaults() {
        let primary = TreeSource::builder().set("x", 1i64).build().unwrap();
        let defaults = TreeSource::builder()
            .set("x", 0i64)
            .set("y", 2i64)
            .build()
            .unwrap();

        let service = DeltaServiceBuilder::new()
            .with_source(Arc::new(primary))
            .with_defaults(Arc::new(defaults))
            .build();

        assert_eq!(service.retrieve::<i64>("x").unwrap(), 1);
        assert_eq!(service.retrieve::<i64>("y").unwrap(), 2);
    }
}
