//! Error types for the relay core
//!
//! Benign duplicates are not errors; handlers report them through their
//! outcome enums. Everything here is either bad input (never retried) or a
//! collaborator failure (left to bus redelivery).

use thiserror::Error;

/// Top-level relay error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Order not found: {order_hash}")]
    OrderNotFound { order_hash: String },

    #[error("No valid order matched the request")]
    NoValidOrder,
}

impl RelayError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        RelayError::InvalidInput(msg.into())
    }

    /// Whether redelivering the same event could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Repository(_) | RelayError::Cache(_))
    }
}

/// Relational store failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    #[error("Query failed: {0}")]
    Query(String),
}

/// Key-value cache failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache value for {key} is malformed: {reason}")]
    Malformed { key: String, reason: String },
}

pub type RelayResult<T> = Result<T, RelayError>;
