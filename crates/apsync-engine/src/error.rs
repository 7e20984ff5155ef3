//! Error types for the export engine.
//!
//! Per-item failures end up as feedback errors; only [`SyncError`]s returned
//! from [`ExportSyncer::run`](crate::ExportSyncer::run) abort a run.

use apsync_core::{CatalogError, ConfigError, NamingError, RoleIdError};
use apsync_repository::RepoError;
use thiserror::Error;

use crate::filters::FilterError;
use crate::masks::MaskError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    RoleId(#[from] RoleIdError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Mask(#[from] MaskError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The Access Provider itself is inconsistent.
    #[error("invalid access provider: {0}")]
    InvalidAccessProvider(String),

    /// Listing warehouse state needed for classification failed.
    #[error("failed to load {what}: {source}")]
    Infrastructure {
        what: String,
        #[source]
        source: RepoError,
    },
}

impl SyncError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SyncError::InvalidAccessProvider(message.into())
    }

    /// Whether the error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Infrastructure { .. }
                | SyncError::Repo(RepoError::RowLimitExceeded { .. })
                | SyncError::Repo(RepoError::Connection(_))
        )
    }
}
