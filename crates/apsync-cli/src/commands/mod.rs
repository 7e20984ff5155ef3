//! Command implementations and the file and connection plumbing they share.

pub mod check;
pub mod export;
pub mod import;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use apsync_adapter_sql::{SqlRepository, SqlxExecutor, SqlxExecutorOptions};
use apsync_core::{AccessProvider, SyncConfig};
use apsync_repository::Repository;
use serde::Serialize;

pub fn load_config(path: &Path) -> Result<SyncConfig> {
    let config = SyncConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Read Access Providers from a YAML or JSON file, chosen by extension.
pub fn load_access_providers(path: &Path) -> Result<Vec<AccessProvider>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let access_providers = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?
    };
    Ok(access_providers)
}

/// Pretty-print `value` as JSON to `output`, or to stdout.
pub fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => fs::write(path, json + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

pub async fn connect(config: &SyncConfig, database_url: Option<String>) -> Result<Arc<dyn Repository>> {
    let url = match database_url {
        Some(url) => url,
        None => config.connection.connection_url()?,
    };
    let executor = SqlxExecutor::connect(
        &url,
        SqlxExecutorOptions {
            max_connections: config.connection.max_connections,
            max_result_rows: config.max_result_rows,
        },
    )
    .await
    .context("failed to connect to the warehouse")?;
    Ok(Arc::new(SqlRepository::new(executor, config.user_batch_size)))
}
