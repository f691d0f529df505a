// Error Taxonomy
// Closed set of failure modes surfaced by the storage contracts and the
// extraction ports. Backend causes are preserved through the source chain.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result alias used across the storage and extraction contracts.
pub type StoreResult<T> = std::result::Result<T, StorageError>;

/// Every failing store or port operation resolves to one of these variants.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Null/blank input where forbidden, out-of-range threshold, or an
    /// unrecognized direction token.
    #[error("invalid input for '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    /// Get, update or delete addressed an id that is not stored.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Relationship create referenced a belief that does not exist for the
    /// edge's agent.
    #[error("belief {belief_id} does not exist for agent {agent_id}")]
    BeliefMissing { belief_id: String, agent_id: String },

    /// Temporal window with `effective_from` after `effective_until`.
    #[error("effective_from {effective_from} is after effective_until {effective_until}")]
    TemporalInvalid {
        effective_from: DateTime<Utc>,
        effective_until: DateTime<Utc>,
    },

    /// Connectivity loss or a timed-out backend call.
    #[error("backend unavailable: {reason}")]
    BackendUnavailable {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Optimistic or concurrent modification rejected by the backend, or a
    /// create that collided with an existing index/row.
    #[error("backend conflict: {detail}")]
    BackendConflict { detail: String },

    /// A persisted document or row did not match the canonical shape.
    #[error("serialization failure: {detail}")]
    Serialization { detail: String },

    /// An extraction port failed; the cause is carried when available.
    #[error("extraction failed: {reason}")]
    ExtractionFailed {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Coarse classification for matching without destructuring variant fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    BeliefMissing,
    TemporalInvalid,
    BackendUnavailable,
    BackendConflict,
    Serialization,
    ExtractionFailed,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::InvalidInput { .. } => ErrorKind::InvalidInput,
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::BeliefMissing { .. } => ErrorKind::BeliefMissing,
            StorageError::TemporalInvalid { .. } => ErrorKind::TemporalInvalid,
            StorageError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            StorageError::BackendConflict { .. } => ErrorKind::BackendConflict,
            StorageError::Serialization { .. } => ErrorKind::Serialization,
            StorageError::ExtractionFailed { .. } => ErrorKind::ExtractionFailed,
        }
    }

    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn belief_missing(belief_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        StorageError::BeliefMissing {
            belief_id: belief_id.into(),
            agent_id: agent_id.into(),
        }
    }

    pub fn backend_unavailable(reason: impl Into<String>) -> Self {
        StorageError::BackendUnavailable {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn backend_conflict(detail: impl Into<String>) -> Self {
        StorageError::BackendConflict {
            detail: detail.into(),
        }
    }

    pub fn serialization(detail: impl Into<String>) -> Self {
        StorageError::Serialization {
            detail: detail.into(),
        }
    }

    pub fn extraction(reason: impl Into<String>) -> Self {
        StorageError::ExtractionFailed {
            reason: reason.into(),
            source: None,
        }
    }

    /// True for the variants an auto-create path may treat as "already
    /// exists" and continue.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::BackendConflict { .. })
    }
}
