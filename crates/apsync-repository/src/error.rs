//! Error types for repository operations.

use thiserror::Error;

/// Errors that can occur while talking to the warehouse.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The object addressed by a statement is absent.
    #[error("{object} does not exist")]
    DoesNotExist { object: String },

    /// The object a statement would create is already present.
    #[error("{object} already exists")]
    AlreadyExists { object: String },

    /// A listing returned more rows than allowed. Results would be truncated.
    #[error("query returned more than {limit} rows: {statement}")]
    RowLimitExceeded { limit: usize, statement: String },

    /// A statement was rejected by the warehouse.
    #[error("statement failed: {statement}: {message}")]
    Statement { statement: String, message: String },

    /// Connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RepoError {
    pub fn does_not_exist(object: impl Into<String>) -> Self {
        RepoError::DoesNotExist {
            object: object.into(),
        }
    }

    pub fn already_exists(object: impl Into<String>) -> Self {
        RepoError::AlreadyExists {
            object: object.into(),
        }
    }

    /// Whether the error means the target is already gone.
    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, RepoError::DoesNotExist { .. })
    }
}
