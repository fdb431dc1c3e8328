//! Error types for the system index manager
//!
//! Errors carry the index or descriptor they concern so log lines and
//! stuck-index diagnostics can name the affected resource directly.

use std::path::PathBuf;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Classification of a failed mutation against the admin API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Network, timeout, conflict or node unavailable; the next
    /// cluster state notification retries the update
    Transient,
    /// The admin API rejected the document; retrying repeats the failure
    Permanent,
}

impl FailureKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for system index management
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or ambiguous descriptor configuration
    #[error("configuration error for {descriptor}: {message}")]
    Configuration {
        /// Pattern or name of the offending descriptor
        descriptor: String,
        /// Description of what's invalid
        message: String,
    },

    /// Mapping or settings mutation failed
    #[error("{kind} {operation} failure for {index}: {message}")]
    Mutation {
        /// Index the mutation targeted
        index: String,
        /// Operation that failed (put_mapping, put_settings)
        operation: String,
        /// Whether the failure can resolve itself
        kind: FailureKind,
        /// Description of what failed
        message: String,
    },

    /// Reading a descriptor or cluster state file failed
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Context where the error occurred (e.g. "dispatcher", "controller")
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a configuration error for the given descriptor
    pub fn configuration(descriptor: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            descriptor: descriptor.into(),
            message: msg.into(),
        }
    }

    /// Create a transient mutation error
    pub fn transient(
        index: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Mutation {
            index: index.into(),
            operation: operation.into(),
            kind: FailureKind::Transient,
            message: msg.into(),
        }
    }

    /// Create a permanent mutation error
    pub fn permanent(
        index: impl Into<String>,
        operation: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Mutation {
            index: index.into(),
            operation: operation.into(),
            kind: FailureKind::Permanent,
            message: msg.into(),
        }
    }

    /// Create an I/O error for the given path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Classify this error for the update dispatcher
    ///
    /// Anything that is not an explicit permanent rejection is treated as
    /// transient: the worst case is one more attempt on the next notification.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Mutation { kind, .. } => *kind,
            Self::Configuration { .. } | Self::Serialization { .. } => FailureKind::Permanent,
            Self::Io { .. } | Self::Internal { .. } => FailureKind::Transient,
        }
    }

    /// Whether retrying the same operation can succeed
    pub fn is_retryable(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }
}
