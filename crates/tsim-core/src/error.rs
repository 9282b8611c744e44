//! Domain-specific error types following panic-free policy.

use crate::{SourceId, SourceKind};
use thiserror::Error;

/// Errors that can occur when building or validating sources.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// The per-kind state does not belong to the declared kind
    #[error("Source {id}: {kind} source cannot hold {state} state")]
    KindMismatch {
        id: SourceId,
        kind: SourceKind,
        state: &'static str,
    },

    /// Invalid field value
    #[error("Source {id}: invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        id: SourceId,
        field: String,
        value: String,
        expected: String,
    },

    /// Too many status candidates for the bounded list
    #[error("Source {id}: {count} status candidates (max: {max})")]
    TooManyStatuses { id: SourceId, count: usize, max: usize },

    /// Unknown kind tag
    #[error("Unknown source kind: {0}")]
    UnknownKind(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
