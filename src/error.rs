//! Error types for livequery.
//!
//! Errors are strongly typed using thiserror. Store errors are carried
//! through unchanged so consumers can match on what the transport reported.

use thiserror::Error;

use crate::change::ChangeType;

/// Errors reported by the document store boundary.
///
/// These are surfaced unchanged to the consumer of the affected view and
/// terminate that subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable {
        message: String,
    },

    #[error("Permission denied: {message}")]
    PermissionDenied {
        message: String,
    },

    #[error("Document not found: {path}")]
    NotFound {
        path: String,
    },

    #[error("Store backend error: {message}")]
    Backend {
        message: String,
    },
}

impl StoreError {
    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns true if the transport reports a condition that may clear on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// A notification whose change indices cannot be reconciled.
///
/// Any of these ends the subscription. Applying the change anyway would
/// silently corrupt the ordered view with no way to recover.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedNotification {
    #[error("{kind} change for '{document_id}' has inconsistent indices (old={old_index:?}, new={new_index:?})")]
    InconsistentIndices {
        kind: ChangeType,
        document_id: String,
        old_index: Option<usize>,
        new_index: Option<usize>,
    },

    #[error("{kind} change for '{document_id}' references index {index} but the result set holds {len} documents")]
    IndexOutOfRange {
        kind: ChangeType,
        document_id: String,
        index: usize,
        len: usize,
    },

    #[error("{kind} change for '{document_id}' found '{found}' at index {index}")]
    DocumentMismatch {
        kind: ChangeType,
        document_id: String,
        index: usize,
        found: String,
    },
}

impl MalformedNotification {
    /// The document the offending change refers to.
    #[must_use]
    pub fn document_id(&self) -> &str {
        match self {
            Self::InconsistentIndices { document_id, .. }
            | Self::IndexOutOfRange { document_id, .. }
            | Self::DocumentMismatch { document_id, .. } => document_id,
        }
    }
}

/// Top-level error type for livequery streams and pass-throughs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiveQueryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed notification: {0}")]
    Malformed(#[from] MalformedNotification),

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },
}

impl LiveQueryError {
    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if this error came from the store boundary.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this error is a malformed notification.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    /// Returns true if resubscribing could succeed.
    ///
    /// Nothing is retried internally; this only classifies the error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Malformed(_) | Self::Serialization { .. } => false,
        }
    }
}

/// Result type alias for livequery operations.
pub type LiveResult<T> = Result<T, LiveQueryError>;
