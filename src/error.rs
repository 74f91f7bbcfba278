//! Error types for the compliance graph core.
//!
//! All errors are strongly typed using thiserror, one enum per layer, unified
//! under [`PactError`]. Callers can pattern match on the specific condition or
//! use the classification helpers (`is_retryable`, `is_contract_violation`).

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::snapshot::SnapshotId;
use crate::storage::StorageError;

/// Programming-contract errors.
///
/// These indicate a caller broke an invariant of the store or engine. They are
/// fatal and must never be retried.
#[derive(Debug, Error)]
pub enum ContractViolation {
    #[error("Snapshot {snapshot} is frozen and cannot be written to")]
    ImmutabilityViolation {
        snapshot: SnapshotId,
    },

    #[error("Snapshot '{label}' already exists")]
    DuplicateSnapshot {
        label: String,
    },

    #[error("Snapshot timestamp {requested} precedes newest snapshot {newest}")]
    SnapshotOutOfOrder {
        requested: DateTime<Utc>,
        newest: DateTime<Utc>,
    },

    #[error("Verdicts of one run must share a timestamp: expected {expected}, found {found}")]
    MixedRunTimestamps {
        expected: DateTime<Utc>,
        found: DateTime<Utc>,
    },

    #[error("Unknown run: {run}")]
    UnknownRun {
        run: String,
    },

    #[error("Run {run} was already validated")]
    RunAlreadyValidated {
        run: String,
    },

    #[error("Blast radius requires a failing verdict (rule '{rule}' passed for {target})")]
    NotAFailingVerdict {
        rule: String,
        target: String,
    },
}

/// Errors raised while planning or evaluating a pattern query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query must contain at least one triple pattern")]
    EmptyQuery,

    #[error("Variable '?{name}' is projected or filtered but never bound by a pattern")]
    UnboundVariable {
        name: String,
    },

    #[error("Snapshot not found: {id}")]
    UnknownSnapshot {
        id: SnapshotId,
    },
}

/// Validation errors for configuration and rule definitions.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Rule id cannot be empty")]
    EmptyRuleId,

    #[error("Rule '{rule}' is defined more than once")]
    DuplicateRule {
        rule: String,
    },

    #[error("Rule '{rule}' has no property constraints")]
    NoConstraints {
        rule: String,
    },

    #[error("Rule '{rule}' declares an empty property path")]
    EmptyPath {
        rule: String,
    },

    #[error("Rule '{rule}' selector is invalid: {reason}")]
    InvalidSelector {
        rule: String,
        reason: String,
    },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex {
        pattern: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Failed to parse {what}: {reason}")]
    Parse {
        what: String,
        reason: String,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum PactError {
    #[error("Contract violation: {0}")]
    Contract(#[from] ContractViolation),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl PactError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error is a broken programming contract.
    ///
    /// Unbound query variables are classified here too: they are caller bugs,
    /// not data conditions.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::Contract(_) | Self::Query(QueryError::UnboundVariable { .. })
        )
    }

    /// Returns true if this is a query error.
    #[must_use]
    pub const fn is_query(&self) -> bool {
        matches!(self, Self::Query(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if retrying the operation may succeed.
    ///
    /// Only persistence failures qualify; a failed freeze leaves the store in
    /// its pre-freeze state, so a retry is always safe.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Contract(_) | Self::Query(_) | Self::Validation(_) | Self::Internal { .. } => {
                false
            }
        }
    }
}

/// Result type alias for graph core operations.
pub type PactResult<T> = Result<T, PactError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immutability_violation_message() {
        let id = SnapshotId::from_micros(1_700_000_000_000_000);
        let err = ContractViolation::ImmutabilityViolation { snapshot: id };
        let msg = format!("{err}");
        assert!(msg.contains("frozen"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_duplicate_snapshot_message() {
        let err = ContractViolation::DuplicateSnapshot {
            label: "assessment-1".to_string(),
        };
        assert!(err.to_string().contains("assessment-1"));
    }

    #[test]
    fn test_query_error_unbound_variable() {
        let err = QueryError::UnboundVariable {
            name: "x".to_string(),
        };
        assert!(err.to_string().contains("?x"));
    }

    #[test]
    fn test_contract_violations_not_retryable() {
        let err: PactError = ContractViolation::DuplicateSnapshot {
            label: "s".to_string(),
        }
        .into();
        assert!(err.is_contract_violation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unbound_variable_is_contract_violation() {
        let err: PactError = QueryError::UnboundVariable {
            name: "c".to_string(),
        }
        .into();
        assert!(err.is_contract_violation());
        assert!(err.is_query());

        let err: PactError = QueryError::EmptyQuery.into();
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_storage_errors_retryable() {
        let err: PactError = StorageError::Io("disk full".to_string()).into();
        assert!(err.is_storage());
        assert!(err.is_retryable());

        let err: PactError = StorageError::Corruption("bad crc".to_string()).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_error() {
        let err = PactError::internal("unexpected state");
        assert!(err.is_internal());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unexpected state"));
    }
}
