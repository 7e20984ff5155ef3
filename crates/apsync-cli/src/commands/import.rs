//! `apsync import`: read warehouse roles and policies as Access Providers.

use std::path::Path;

use anyhow::Result;
use apsync_import::SourceImporter;

use super::{connect, load_config, write_json};

pub async fn run(config_path: &Path, database_url: Option<String>, output: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let repo = connect(&config, database_url).await?;

    let access_providers = SourceImporter::new(repo, config)?.import().await?;
    write_json(&access_providers, output)?;
    Ok(())
}
