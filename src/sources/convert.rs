//! Typed conversion of raw source values.

use super::{ConfigurationSource, Query};
use crate::error::{BoxError, SourceError};
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Converter =
    Arc<dyn Fn(config::Value) -> Result<Box<dyn Any + Send>, BoxError> + Send + Sync>;

/// Registry of target-type converters.
///
/// A converter registered for a type takes precedence over serde. Types
/// without a converter are deserialized straight from the value tree.
///
/// # Examples
///
/// ```rust
/// use hotswap_bindings::sources::{ConverterRegistry, Query};
/// use std::time::Duration;
///
/// let mut converters = ConverterRegistry::new();
/// converters.register(|value: config::Value| {
///     Ok(Duration::from_millis(value.into_int()? as u64))
/// });
///
/// let timeout: Duration = converters
///     .convert_registered(&Query::from("timeout"), config::Value::from(250i64))
///     .unwrap();
/// assert_eq!(timeout, Duration::from_millis(250));
/// ```
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<TypeId, Converter>,
}

impl ConverterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the converter for `T`, replacing any previous one.
    pub fn register<T, F>(&mut self, converter: F)
    where
        T: Any + Send,
        F: Fn(config::Value) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        let erased: Converter =
            Arc::new(move |value| converter(value).map(|typed| Box::new(typed) as Box<dyn Any + Send>));
        self.converters.insert(TypeId::of::<T>(), erased);
    }

    /// Whether a converter is registered for `T`.
    pub fn contains<T: Any>(&self) -> bool {
        self.converters.contains_key(&TypeId::of::<T>())
    }

    /// Number of registered converters.
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Convert with the registered converter, or serde if there is none.
    pub fn convert<T>(&self, query: &Query, value: config::Value) -> Result<T, SourceError>
    where
        T: DeserializeOwned + Any + Send,
    {
        if self.contains::<T>() {
            return self.convert_registered(query, value);
        }
        value
            .try_deserialize::<T>()
            .map_err(|e| conversion_error::<T>(query, e.to_string()))
    }

    /// Convert with the registered converter only.
    ///
    /// # Errors
    ///
    /// Fails with [`SourceError::Conversion`] if no converter is registered
    /// for `T` or the converter rejects the value.
    pub fn convert_registered<T>(&self, query: &Query, value: config::Value) -> Result<T, SourceError>
    where
        T: Any + Send,
    {
        let converter = self
            .converters
            .get(&TypeId::of::<T>())
            .ok_or_else(|| conversion_error::<T>(query, "no converter registered".to_string()))?;

        let converted = converter(value).map_err(|e| conversion_error::<T>(query, e.to_string()))?;
        converted
            .downcast::<T>()
            .map(|typed| *typed)
            .map_err(|_| conversion_error::<T>(query, "converter produced another type".to_string()))
    }

    /// Retrieve the single value for `query` from `source` as a `T`.
    pub fn retrieve<T>(&self, source: &dyn ConfigurationSource, query: &Query) -> Result<T, SourceError>
    where
        T: DeserializeOwned + Any + Send,
    {
        let raw = source.retrieve(query)?;
        self.convert(query, raw)
    }

    /// Retrieve every value for `query` from `source` as `T`s.
    ///
    /// An absent value gives an empty list; a value that does not convert
    /// fails the whole list.
    pub fn retrieve_list<T>(
        &self,
        source: &dyn ConfigurationSource,
        query: &Query,
    ) -> Result<Vec<T>, SourceError>
    where
        T: DeserializeOwned + Any + Send,
    {
        source
            .retrieve_list(query)
            .into_iter()
            .map(|raw| self.convert(query, raw))
            .collect()
    }
}

fn conversion_error<T>(query: &Query, reason: String) -> SourceError {
    SourceError::Conversion {
        query: query.clone(),
        type_name: std::any::type_name::<T>(),
        reason,
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("converters", &self.converters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::TreeSource;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pool {
        size: u32,
        name: String,
    }

    #[derive(Debug, PartialEq)]
    struct Celsius(f64);

    #[test]
    fn test_serde_fallback() {
        let source = TreeSource::builder()
            .set("pool.size", 4i64)
            .set("pool.name", "main")
            .build()
            .unwrap();
        let converters = ConverterRegistry::new();

        let pool: Pool = converters.retrieve(&source, &Query::from("pool")).unwrap();
        assert_eq!(
            pool,
            Pool {
                size: 4,
                name: "main".to_string()
            }
        );
    }

    #[test]
    fn test_registered_converter_wins() {
        let mut converters = ConverterRegistry::new();
        converters.register(|value: config::Value| Ok(value.into_int()? * 10));
        assert!(converters.contains::<i64>());

        let converted: i64 = converters
            .convert(&Query::from("x"), config::Value::from(4i64))
            .unwrap();
        assert_eq!(converted, 40);
    }

    #[test]
    fn test_missing_converter() {
        let converters = ConverterRegistry::new();
        let result: Result<Celsius, _> =
            converters.convert_registered(&Query::from("t"), config::Value::from(21.5));
        assert!(matches!(result, Err(SourceError::Conversion { .. })));
    }

    #[test]
    fn test_conversion_failure_names_type() {
        let source = TreeSource::builder().set("x", "not a number").build().unwrap();
        let converters = ConverterRegistry::new();

        match converters.retrieve::<u16>(&source, &Query::from("x")) {
            Err(SourceError::Conversion { type_name, .. }) => assert_eq!(type_name, "u16"),
            other => panic!("expected Conversion, got {:?}", other),
        }
    }

    #[test]
    fn test_retrieve_list_absent_is_empty() {
        let source = TreeSource::builder().build().unwrap();
        let converters = ConverterRegistry::new();
        let values: Vec<String> = converters.retrieve_list(&source, &Query::from("x")).unwrap();
        assert!(values.is_empty());
    }
}
