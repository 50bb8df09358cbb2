//! Configuration source capability.

use crate::error::SourceError;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An opaque key or path addressing a value inside a source.
///
/// Tree-backed sources read it as a dotted path. A leading `/` and `/`
/// separators are accepted as well, so `/server/port` and `server.port`
/// address the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression(String);

impl Expression {
    /// Create an expression from any string.
    pub fn new(expression: impl Into<String>) -> Self {
        Self(expression.into())
    }

    /// The expression exactly as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The expression as a dotted path.
    ///
    /// ```rust
    /// use hotswap_bindings::sources::Expression;
    ///
    /// assert_eq!(Expression::new("/server/port").to_path(), "server.port");
    /// assert_eq!(Expression::new("server.port").to_path(), "server.port");
    /// ```
    pub fn to_path(&self) -> String {
        self.0.trim_start_matches('/').replace('/', ".")
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Expression {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Expression {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Runtime identity of a target type, used for type-only lookups.
#[derive(Debug, Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// The tag of `T`.
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The type's `TypeId`.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The type's name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// What a source is asked for: an addressed value, or the value of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    /// Look a value up by expression.
    Expression(Expression),
    /// Look up the value registered for a type.
    Type(TypeTag),
}

impl Query {
    /// Query by expression.
    pub fn expression(expression: impl Into<Expression>) -> Self {
        Self::Expression(expression.into())
    }

    /// Query by type alone.
    pub fn of_type<T: Any>() -> Self {
        Self::Type(TypeTag::of::<T>())
    }

    /// The expression, for expression queries.
    pub fn as_expression(&self) -> Option<&Expression> {
        match self {
            Self::Expression(expression) => Some(expression),
            Self::Type(_) => None,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression(expression) => write!(f, "expression '{}'", expression),
            Self::Type(tag) => write!(f, "type {}", tag),
        }
    }
}

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Self::Expression(value.into())
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Self::Expression(value.into())
    }
}

impl From<Expression> for Query {
    fn from(value: Expression) -> Self {
        Self::Expression(value)
    }
}

impl From<TypeTag> for Query {
    fn from(value: TypeTag) -> Self {
        Self::Type(value)
    }
}

/// Trait for configuration sources.
///
/// A source answers three questions about a [`Query`]: is something there,
/// what is the single value, and what are all the values. Values are raw
/// `config::Value` trees; typing happens in a
/// [`ConverterRegistry`](crate::sources::ConverterRegistry).
///
/// Implementations are expected to be fast, in-memory lookups. Anything that
/// needs I/O should load eagerly and answer from memory.
pub trait ConfigurationSource: Send + Sync {
    /// Get a human-readable name for this source (for logging/debugging).
    fn name(&self) -> String;

    /// Whether a value is available for `query`.
    fn is_available(&self, query: &Query) -> bool;

    /// Retrieve the single value for `query`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotFound`] when nothing matches and
    /// [`SourceError::Ambiguous`] when more than one value does.
    fn retrieve(&self, query: &Query) -> Result<config::Value, SourceError>;

    /// Retrieve every value for `query`. Never fails; empty when absent.
    fn retrieve_list(&self, query: &Query) -> Vec<config::Value>;
}

impl<S: ConfigurationSource + ?Sized> ConfigurationSource for Arc<S> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn is_available(&self, query: &Query) -> bool {
        (**self).is_available(query)
    }

    fn retrieve(&self, query: &Query) -> Result<config::Value, SourceError> {
        (**self).retrieve(query)
    }

    fn retrieve_list(&self, query: &Query) -> Vec<config::Value> {
        (**self).retrieve_list(query)
    }
}

/// The source that has nothing.
///
/// Answers "not available" and empty to every query and never panics. It is
/// the neutral element of a [`FallbackConfigurationSource`](crate::sources::FallbackConfigurationSource).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSource;

/// The reserved empty source.
pub const NONE: NoSource = NoSource;

/// A shared handle to [`NONE`].
pub fn none() -> Arc<dyn ConfigurationSource> {
    Arc::new(NONE)
}

impl ConfigurationSource for NoSource {
    fn name(&self) -> String {
        "none".to_string()
    }

    fn is_available(&self, _query: &Query) -> bool {
        false
    }

    fn retrieve(&self, query: &Query) -> Result<config::Value, SourceError> {
        Err(SourceError::NotFound {
            query: query.clone(),
        })
    }

    fn retrieve_list(&self, _query: &Query) -> Vec<config::Value> {
        Vec::new()
    }
}
