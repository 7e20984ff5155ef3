//! Error types for the import direction.

use apsync_core::{CatalogError, ConfigError};
use apsync_repository::RepoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Reading the state of a single role or policy failed.
    #[error("failed to read {object}: {source}")]
    Read {
        object: String,
        #[source]
        source: RepoError,
    },
}

impl ImportError {
    pub fn read(object: impl Into<String>, source: RepoError) -> Self {
        ImportError::Read {
            object: object.into(),
            source,
        }
    }
}
