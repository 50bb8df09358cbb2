//! Primary/secondary resolution chain.

use super::{ConfigurationSource, NONE, Query};
use crate::error::SourceError;
use std::fmt;
use std::sync::Arc;

/// A source that answers from `primary` and falls back to `secondary`.
///
/// Sources are never merged: as soon as `primary` reports a value available,
/// `secondary` is not consulted for that query. Both sides are always set;
/// an absent side is [`NONE`].
///
/// # Examples
///
/// ```rust
/// use hotswap_bindings::sources::{ConfigurationSource, FallbackConfigurationSource, Query, TreeSource};
/// use std::sync::Arc;
///
/// # fn example() -> hotswap_bindings::error::Result<()> {
/// let overrides = TreeSource::builder().set("port", 9090i64).build()?;
/// let defaults = TreeSource::builder()
///     .set("port", 8080i64)
///     .set("host", "localhost")
///     .build()?;
///
/// let chain = FallbackConfigurationSource::new(Arc::new(overrides), Arc::new(defaults));
/// assert_eq!(chain.retrieve(&Query::from("port")).unwrap().into_int().unwrap(), 9090);
/// assert!(chain.is_available(&Query::from("host")));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FallbackConfigurationSource {
    primary: Arc<dyn ConfigurationSource>,
    secondary: Arc<dyn ConfigurationSource>,
}

impl FallbackConfigurationSource {
    /// Chain `primary` in front of `secondary`.
    pub fn new(
        primary: Arc<dyn ConfigurationSource>,
        secondary: Arc<dyn ConfigurationSource>,
    ) -> Self {
        Self { primary, secondary }
    }

    /// A chain with nothing behind `primary`.
    pub fn primary_only(primary: Arc<dyn ConfigurationSource>) -> Self {
        Self::new(primary, Arc::new(NONE))
    }

    /// The source consulted first.
    pub fn primary(&self) -> &Arc<dyn ConfigurationSource> {
        &self.primary
    }

    /// The source consulted when the primary has nothing.
    pub fn secondary(&self) -> &Arc<dyn ConfigurationSource> {
        &self.secondary
    }

    /// The side that answers `query`, if either does.
    fn select(&self, query: &Query) -> Option<&Arc<dyn ConfigurationSource>> {
        if self.primary.is_available(query) {
            Some(&self.primary)
        } else if self.secondary.is_available(query) {
            Some(&self.secondary)
        } else {
            None
        }
    }
}

impl Default for FallbackConfigurationSource {
    fn default() -> Self {
        Self::new(Arc::new(NONE), Arc::new(NONE))
    }
}

impl fmt::Debug for FallbackConfigurationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackConfigurationSource")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .finish()
    }
}

impl ConfigurationSource for FallbackConfigurationSource {
    fn name(&self) -> String {
        format!("{} -> {}", self.primary.name(), self.secondary.name())
    }

    fn is_available(&self, query: &Query) -> bool {
        self.select(query).is_some()
    }

    fn retrieve(&self, query: &Query) -> Result<config::Value, SourceError> {
        match self.select(query) {
            Some(source) => source.retrieve(query),
            None => Err(SourceError::NotFound {
                query: query.clone(),
            }),
        }
    }

    fn retrieve_list(&self, query: &Query) -> Vec<config::Value> {
        match self.select(query) {
            Some(source) => source.retrieve_list(query),
            None => Vec::new(),
        }
    }
}
