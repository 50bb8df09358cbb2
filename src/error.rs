//! Error types for hotswap-bindings.

use crate::binding::BindingDescriptor;
use crate::sources::Query;
use std::fmt;

/// Result type alias for hotswap-bindings operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Boxed error returned by listeners and converters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by a [`ConfigurationSource`](crate::sources::ConfigurationSource).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Nothing is available for the query.
    #[error("No value available for {query}")]
    NotFound {
        /// The query that found nothing
        query: Query,
    },

    /// More than one value matches a query that expects exactly one.
    #[error("Ambiguous value for {query}: {matches} candidates")]
    Ambiguous {
        /// The ambiguous query
        query: Query,
        /// Number of candidates the source found
        matches: usize,
    },

    /// A value was found but could not be converted to the target type.
    #[error("Cannot convert {query} to {type_name}: {reason}")]
    Conversion {
        /// The query whose value failed to convert
        query: Query,
        /// Name of the target type
        type_name: &'static str,
        /// Why the conversion failed
        reason: String,
    },
}

/// Discovery failure for a single binding.
#[derive(Debug, thiserror::Error)]
#[error("Failed to resolve {descriptor}: {source}")]
pub struct ValueResolutionError {
    /// The binding that could not be resolved
    pub descriptor: BindingDescriptor,
    /// The underlying source failure
    pub source: SourceError,
}

/// Commit failure for a single binding: its listener rejected the new value.
#[derive(Debug, thiserror::Error)]
#[error("Failed to assign {descriptor}: {reason}")]
pub struct ValueAssignmentError {
    /// Short description of what went wrong
    pub reason: String,
    /// The binding whose listener failed
    pub descriptor: BindingDescriptor,
    /// The listener's own error
    #[source]
    pub cause: BoxError,
}

/// The step of a group update where a [`GroupError`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupPhase {
    /// Resolving new values from the candidate source.
    Discovery,
    /// Handing resolved values to value listeners.
    Assignment,
    /// Invoking the group listener after all values were assigned.
    ListenerInvocation,
}

impl fmt::Display for GroupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Assignment => write!(f, "assignment"),
            Self::ListenerInvocation => write!(f, "listener invocation"),
        }
    }
}

/// Failure of one group during a refresh or registration.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    /// The first binding of the group that failed to resolve.
    #[error("Group '{group}' failed discovery: {error}")]
    Discovery {
        /// Name of the failing group
        group: String,
        /// The resolution error that aborted discovery
        #[source]
        error: ValueResolutionError,
    },

    /// Every listener failure collected while assigning the group's values.
    #[error("Group '{group}' failed assignment of {} value(s)", .errors.len())]
    Assignment {
        /// Name of the failing group
        group: String,
        /// All assignment failures, in commit order
        errors: Vec<ValueAssignmentError>,
    },

    /// The group listener failed after all values were assigned.
    #[error("Group '{group}' listener failed: {cause}")]
    ListenerInvocation {
        /// Name of the failing group
        group: String,
        /// The listener's own error
        #[source]
        cause: BoxError,
    },
}

impl GroupError {
    /// Name of the group that failed.
    pub fn group_name(&self) -> &str {
        match self {
            Self::Discovery { group, .. }
            | Self::Assignment { group, .. }
            | Self::ListenerInvocation { group, .. } => group,
        }
    }

    /// Step at which the group failed.
    pub fn phase(&self) -> GroupPhase {
        match self {
            Self::Discovery { .. } => GroupPhase::Discovery,
            Self::Assignment { .. } => GroupPhase::Assignment,
            Self::ListenerInvocation { .. } => GroupPhase::ListenerInvocation,
        }
    }
}

/// Phase of a refresh in which a [`RefreshError`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshPhase {
    /// No listener was invoked; the live configuration is untouched.
    Discovery,
    /// Some groups may already have observed the new values.
    Commit,
}

impl fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Aggregate failure of one refresh across all groups.
#[derive(Debug)]
pub struct RefreshError {
    /// Phase that failed
    pub phase: RefreshPhase,
    /// One entry per failing group, in processing order
    pub group_errors: Vec<GroupError>,
}

impl RefreshError {
    /// Names of the groups that failed, in processing order.
    pub fn failed_groups(&self) -> Vec<&str> {
        self.group_errors.iter().map(GroupError::group_name).collect()
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Refresh failed during {}: {} group(s) reported errors",
            self.phase,
            self.group_errors.len()
        )?;
        for (i, err) in self.group_errors.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for RefreshError {}

/// Failures reported by a [`SnapshotProvider`](crate::snapshot::SnapshotProvider).
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Neither the configured location nor any fallback produced a snapshot.
    #[error("No snapshot available at {location}: {reason}")]
    NoSnapshotAvailable {
        /// Where the provider looked
        location: String,
        /// Why nothing could be loaded
        reason: String,
    },

    /// An updated snapshot exists but cannot be used.
    #[error("Invalid snapshot at {location}: {reason}")]
    InvalidSnapshot {
        /// Location of the invalid snapshot
        location: String,
        /// Why it was refused
        reason: String,
    },
}

/// Errors that can occur when working with live bindings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to load a configuration tree.
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    /// A source could not answer a plain retrieval.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A single binding could not be resolved at registration.
    #[error(transparent)]
    Resolution(#[from] ValueResolutionError),

    /// A single binding's listener failed at registration.
    #[error(transparent)]
    Assignment(#[from] ValueAssignmentError),

    /// A group failed at registration.
    #[error(transparent)]
    Group(#[from] GroupError),

    /// A refresh failed.
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// A snapshot provider failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// An operation would break one of the service's structural guarantees.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// File watching is not supported or failed to initialize.
    #[error("File watching error: {0}")]
    WatchError(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ConfigError {
    /// The refresh failure carried by this error, if any.
    pub fn as_refresh(&self) -> Option<&RefreshError> {
        match self {
            Self::Refresh(err) => Some(err),
            _ => None,
        }
    }
}
