//! Configuration for apsync runs.
//!
//! A single YAML file configures both directions:
//!
//! ```yaml
//! connection:
//!   database_url_env: WAREHOUSE_URL
//! role_prefix: ""
//! excluded_roles: [ORGADMIN]
//! import_database_roles: true
//! ignore_linked_roles: ["^SYS_.*"]
//! tags:
//!   owner_email: GOVERNANCE.TAGS.OWNER_EMAIL
//! ```

pub mod connection;

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::naming::{NamingConstraints, NamingError};

pub use connection::ConnectionConfig;

/// Complete configuration for an import or export run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Warehouse connection.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Rules for generated role names.
    #[serde(default)]
    pub naming: NamingConstraints,

    /// Only account roles starting with this prefix are imported.
    #[serde(default)]
    pub role_prefix: String,

    /// Prefix of generated masking policy names.
    #[serde(default = "default_mask_prefix")]
    pub mask_prefix: String,

    /// Prefix of generated row access policy names.
    #[serde(default = "default_filter_prefix")]
    pub filter_prefix: String,

    /// Prefix of generated share names.
    #[serde(default = "default_share_prefix")]
    pub share_prefix: String,

    /// Roles (namespaced external ids) never imported.
    #[serde(default)]
    pub excluded_roles: Vec<String>,

    /// Role owners whose roles are managed elsewhere.
    #[serde(default)]
    pub excluded_owners: Vec<String>,

    /// Databases skipped when enumerating database roles and policies.
    #[serde(default)]
    pub excluded_databases: Vec<String>,

    /// Partially lock roles of excluded owners instead of locking them fully.
    #[serde(default)]
    pub link_to_external_identity_store_groups: bool,

    #[serde(default = "default_true")]
    pub import_database_roles: bool,

    #[serde(default)]
    pub import_application_roles: bool,

    #[serde(default = "default_true")]
    pub import_masks: bool,

    #[serde(default = "default_true")]
    pub import_filters: bool,

    /// Inherited roles matching one of these patterns are never granted or revoked.
    #[serde(default)]
    pub ignore_linked_roles: Vec<String>,

    /// Create FUTURE grants when a container permission expands to its children.
    #[serde(default)]
    pub create_future_grants: bool,

    /// Tags stamped on roles from Access Provider owners.
    #[serde(default)]
    pub tags: OwnerTagConfig,

    /// Mask generator used when an Access Provider does not request one.
    #[serde(default = "default_mask_type")]
    pub default_mask_type: String,

    /// Statements per batch for user grants and revokes.
    #[serde(default = "default_user_batch_size")]
    pub user_batch_size: usize,

    /// Hard limit on rows returned by a listing query.
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            naming: NamingConstraints::default(),
            role_prefix: String::new(),
            mask_prefix: default_mask_prefix(),
            filter_prefix: default_filter_prefix(),
            share_prefix: default_share_prefix(),
            excluded_roles: Vec::new(),
            excluded_owners: Vec::new(),
            excluded_databases: Vec::new(),
            link_to_external_identity_store_groups: false,
            import_database_roles: true,
            import_application_roles: false,
            import_masks: true,
            import_filters: true,
            ignore_linked_roles: Vec::new(),
            create_future_grants: false,
            tags: OwnerTagConfig::default(),
            default_mask_type: default_mask_type(),
            user_batch_size: default_user_batch_size(),
            max_result_rows: default_max_result_rows(),
        }
    }
}

/// Fully qualified tag names used to record Access Provider owners on roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnerTagConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_group: Option<String>,
}

impl OwnerTagConfig {
    pub fn is_configured(&self) -> bool {
        self.owner_email.is_some() || self.owner_name.is_some() || self.owner_group.is_some()
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Check everything that can be checked without a warehouse connection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.naming.validate()?;
        self.ignore_linked_role_patterns()?;

        if self.user_batch_size == 0 {
            return Err(ConfigError::Config("user_batch_size must be positive".to_string()));
        }
        if self.max_result_rows == 0 {
            return Err(ConfigError::Config("max_result_rows must be positive".to_string()));
        }
        for (field, prefix) in [
            ("mask_prefix", &self.mask_prefix),
            ("filter_prefix", &self.filter_prefix),
            ("share_prefix", &self.share_prefix),
        ] {
            if prefix.is_empty() {
                return Err(ConfigError::Config(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }

    /// Compile the ignore-linked-role patterns.
    pub fn ignore_linked_role_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        self.ignore_linked_roles
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::Pattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect()
    }

    pub fn is_database_excluded(&self, database: &str) -> bool {
        self.excluded_databases
            .iter()
            .any(|d| d.eq_ignore_ascii_case(database))
    }

    pub fn is_owner_excluded(&self, owner: &str) -> bool {
        self.excluded_owners.iter().any(|o| o == owner)
    }
}

fn default_true() -> bool {
    true
}

fn default_mask_prefix() -> String {
    "APSYNC_MASK_".to_string()
}

fn default_filter_prefix() -> String {
    "APSYNC_FILTER_".to_string()
}

fn default_share_prefix() -> String {
    "APSYNC_SHARE_".to_string()
}

fn default_mask_type() -> String {
    "NULL".to_string()
}

fn default_user_batch_size() -> usize {
    200
}

fn default_max_result_rows() -> usize {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = SyncConfig::from_yaml("{}").unwrap();
        assert_eq!(config.user_batch_size, 200);
        assert_eq!(config.max_result_rows, 10_000);
        assert_eq!(config.naming.split_character, '_');
        assert!(config.import_database_roles);
        assert!(!config.import_application_roles);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = SyncConfig::from_yaml("ignore_linked_roles: ['(unclosed']").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Pattern { .. })));
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = SyncConfig::from_yaml("user_batch_size: 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "excluded_owners: [ADMIN_TEAM]\ntags:\n  owner_email: GOV.TAGS.OWNER_EMAIL\nnaming:\n  max_length: 64"
        )
        .unwrap();

        let config = SyncConfig::from_file(file.path()).unwrap();
        assert!(config.is_owner_excluded("ADMIN_TEAM"));
        assert!(config.tags.is_configured());
        assert_eq!(config.naming.max_length, 64);
        assert!(config.naming.upper_case_letters);
    }
}
