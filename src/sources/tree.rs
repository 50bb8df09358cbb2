//! In-memory configuration tree source.

use super::{ConfigurationSource, Expression, Query, TypeTag};
use crate::error::{ConfigError, Result, SourceError};
use config::{Environment, File, ValueKind};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A [`ConfigurationSource`] over a fully loaded `config::Config` tree.
///
/// Expressions are dotted paths into the tree. Type-only queries resolve
/// through paths bound with [`TreeSourceBuilder::bind_type`].
///
/// # Examples
///
/// ```rust
/// use hotswap_bindings::sources::{ConfigurationSource, Query, TreeSource};
///
/// # fn example() -> hotswap_bindings::error::Result<()> {
/// let source = TreeSource::builder()
///     .set("server.port", 8080i64)
///     .set("server.hosts", vec!["a", "b"])
///     .build()?;
///
/// assert!(source.is_available(&Query::from("/server/port")));
/// assert_eq!(source.retrieve_list(&Query::from("server.hosts")).len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct TreeSource {
    name: String,
    config: config::Config,
    type_paths: HashMap<TypeId, Vec<Expression>>,
}

impl TreeSource {
    /// Create a new builder for a tree source.
    pub fn builder() -> TreeSourceBuilder {
        TreeSourceBuilder::new()
    }

    /// Wrap an already built `config::Config`.
    pub fn from_config(name: impl Into<String>, config: config::Config) -> Self {
        Self {
            name: name.into(),
            config,
            type_paths: HashMap::new(),
        }
    }

    /// The underlying tree.
    pub fn config(&self) -> &config::Config {
        &self.config
    }

    fn lookup(&self, expression: &Expression) -> Option<config::Value> {
        self.config
            .get::<config::Value>(&expression.to_path())
            .ok()
            .filter(|value| !matches!(value.kind, ValueKind::Nil))
    }

    fn lookup_type(&self, tag: &TypeTag) -> Vec<config::Value> {
        self.type_paths
            .get(&tag.id())
            .map(|paths| paths.iter().filter_map(|path| self.lookup(path)).collect())
            .unwrap_or_default()
    }

    fn matches(&self, query: &Query) -> Vec<config::Value> {
        match query {
            Query::Expression(expression) => self.lookup(expression).into_iter().collect(),
            Query::Type(tag) => self.lookup_type(tag),
        }
    }
}

/// An array expands to its elements; anything else is a list of one.
fn expand(value: config::Value) -> Vec<config::Value> {
    match value.kind {
        ValueKind::Array(items) => items,
        _ => vec![value],
    }
}

impl ConfigurationSource for TreeSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_available(&self, query: &Query) -> bool {
        !self.matches(query).is_empty()
    }

    fn retrieve(&self, query: &Query) -> std::result::Result<config::Value, SourceError> {
        let mut matches = self.matches(query);
        match matches.len() {
            0 => Err(SourceError::NotFound {
                query: query.clone(),
            }),
            1 => Ok(matches.remove(0)),
            count => Err(SourceError::Ambiguous {
                query: query.clone(),
                matches: count,
            }),
        }
    }

    fn retrieve_list(&self, query: &Query) -> Vec<config::Value> {
        self.matches(query).into_iter().flat_map(expand).collect()
    }
}

impl fmt::Debug for TreeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeSource")
            .field("name", &self.name)
            .field("bound_types", &self.type_paths.len())
            .finish()
    }
}

/// Builder for a [`TreeSource`].
///
/// Layers are applied in a fixed order: files (in the order given), then
/// environment variables, then explicit [`set`](Self::set) values.
pub struct TreeSourceBuilder {
    name: Option<String>,
    files: Vec<PathBuf>,
    env: Option<(String, String)>,
    values: Vec<(String, config::Value)>,
    type_paths: HashMap<TypeId, Vec<Expression>>,
}

impl TreeSourceBuilder {
    /// Create a new builder with no layers.
    pub fn new() -> Self {
        Self {
            name: None,
            files: Vec::new(),
            env: None,
            values: Vec::new(),
            type_paths: HashMap::new(),
        }
    }

    /// Name reported by the built source. Defaults to the file list, or `memory`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a file layer. The format is detected from the extension:
    /// `.yaml`/`.yml`, `.toml` or `.json`.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Add environment variables as a layer.
    ///
    /// `APP_SERVER__PORT=8080` with prefix `APP` and separator `__` becomes
    /// `server.port = 8080`.
    pub fn with_env(mut self, prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        self.env = Some((prefix.into(), separator.into()));
        self
    }

    /// Set a single value at `path`.
    pub fn set(mut self, path: impl Into<Expression>, value: impl Into<config::Value>) -> Self {
        self.values.push((path.into().to_path(), value.into()));
        self
    }

    /// Make type-only queries for `T` resolve to the value at `path`.
    ///
    /// Binding the same type to several paths that all hold values makes
    /// single retrieval ambiguous and list retrieval return all of them.
    pub fn bind_type<T: Any>(mut self, path: impl Into<Expression>) -> Self {
        self.type_paths
            .entry(TypeId::of::<T>())
            .or_default()
            .push(path.into());
        self
    }

    /// Load every layer and build the source.
    ///
    /// # Errors
    ///
    /// Returns an error if a file has an unsupported extension, does not
    /// exist, or cannot be parsed, or if a value cannot be set.
    pub fn build(self) -> Result<TreeSource> {
        let mut builder = config::Config::builder();

        for path in &self.files {
            validate_file(path)?;
            builder = builder.add_source(File::from(path.clone()).required(true));
        }

        if let Some((prefix, separator)) = &self.env {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .separator(separator)
                    .try_parsing(true),
            );
        }

        for (path, value) in self.values {
            builder = builder.set_override(&path, value).map_err(|e| {
                ConfigError::LoadError(format!("Failed to set '{}': {}", path, e))
            })?;
        }

        let config = builder
            .build()
            .map_err(|e| ConfigError::LoadError(format!("Failed to build configuration: {}", e)))?;

        let name = self.name.unwrap_or_else(|| {
            if self.files.is_empty() {
                "memory".to_string()
            } else {
                let files: Vec<String> = self
                    .files
                    .iter()
                    .map(|path| format!("file:{}", path.display()))
                    .collect();
                files.join(",")
            }
        });

        Ok(TreeSource {
            name,
            config,
            type_paths: self.type_paths,
        })
    }
}

impl Default for TreeSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that a file layer exists and has a supported extension.
fn validate_file(path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| {
            ConfigError::LoadError(format!(
                "Unable to determine file format for: {}",
                path.display()
            ))
        })?;

    match extension {
        "yaml" | "yml" | "toml" | "json" => {}
        _ => {
            return Err(ConfigError::LoadError(format!(
                "Unsupported file extension: {}. Supported: .yaml, .yml, .toml, .json",
                extension
            )));
        }
    }

    if !path.exists() {
        return Err(ConfigError::LoadError(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    Ok(())
}
