//! Error types for the operator
//!
//! The variants mirror how a reconcile treats a store answer: `AlreadyExists`
//! and `Conflict` are expected outcomes that callers branch on, `Invariant` and
//! `Validation` are permanent, everything else is reported to the dispatcher
//! for a retry with backoff.

use thiserror::Error;

/// Main error type for operator operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Create collided with an existing object of the same name
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
    },

    /// Update was rejected because the stored version moved on
    #[error("update conflict on {kind} {name}")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
    },

    /// A referenced object that must exist was not found
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
    },

    /// The declared hierarchy is broken (e.g. a pairing without its tenant)
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Validation error for CRD specs
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Store failure that is not a Kubernetes API error
    #[error("store error: {0}")]
    Store(String),

    /// The reconcile was cancelled before it completed
    #[error("reconcile cancelled")]
    Cancelled,
}

impl Error {
    /// Create an already-exists error for the given kind and name
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error for the given kind and name
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a not-found error for the given kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an invariant error with the given message
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a store error with the given message
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// True for create collisions
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// True for optimistic-concurrency rejections
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the dispatcher should schedule another attempt.
    ///
    /// Invariant and validation failures need a change to the declared
    /// objects, and a cancelled reconcile means the process is shutting down.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Invariant(_) | Self::Validation(_) | Self::Cancelled
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
