//! `apsync export`: push Access Providers to the warehouse.

use std::path::Path;

use anyhow::{Result, bail};
use apsync_engine::{CollectingFeedbackSink, ExportSyncer};

use super::{connect, load_access_providers, load_config, write_json};

pub async fn run(
    config_path: &Path,
    database_url: Option<String>,
    input: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let access_providers = load_access_providers(input)?;
    let repo = connect(&config, database_url).await?;

    let sink = CollectingFeedbackSink::new();
    ExportSyncer::new(repo, config)
        .run(access_providers, &sink)
        .await?;

    let records = sink.records();
    write_json(&records, output)?;

    let failed = records.iter().filter(|f| !f.is_success()).count();
    tracing::info!(processed = records.len(), failed, "export complete");
    if failed > 0 {
        bail!("{} of {} access providers failed", failed, records.len());
    }
    Ok(())
}
