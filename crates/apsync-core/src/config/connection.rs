//! Warehouse connection configuration.
//!
//! Two configuration methods are supported, in order of precedence:
//! 1. `database_url_env` - reference an environment variable
//! 2. `database_url` - provide the URL directly

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Configuration for the warehouse connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Environment variable name containing the connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url_env: Option<String>,

    /// Full connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Connections kept in the pool. One connection drives a run.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            database_url_env: None,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl ConnectionConfig {
    /// Resolve the connection URL.
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        if let Some(var) = &self.database_url_env {
            return std::env::var(var).map_err(|_| {
                ConfigError::Config(format!("environment variable {} is not set", var))
            });
        }
        self.database_url
            .clone()
            .ok_or_else(|| ConfigError::Config("no connection URL configured".to_string()))
    }
}

fn default_max_connections() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_url() {
        let config = ConnectionConfig {
            database_url: Some("postgres://wh@localhost/db".to_string()),
            ..ConnectionConfig::default()
        };
        assert_eq!(config.connection_url().unwrap(), "postgres://wh@localhost/db");
    }

    #[test]
    fn test_env_url_takes_precedence() {
        // SAFETY: We're in a test and controlling the environment
        unsafe {
            std::env::set_var("APSYNC_TEST_WAREHOUSE_URL", "postgres://env@host/db");
        }

        let config = ConnectionConfig {
            database_url_env: Some("APSYNC_TEST_WAREHOUSE_URL".to_string()),
            database_url: Some("postgres://ignored".to_string()),
            max_connections: 1,
        };
        assert_eq!(config.connection_url().unwrap(), "postgres://env@host/db");

        // SAFETY: Cleanup in test
        unsafe {
            std::env::remove_var("APSYNC_TEST_WAREHOUSE_URL");
        }
    }

    #[test]
    fn test_missing_url() {
        assert!(ConnectionConfig::default().connection_url().is_err());
    }
}
