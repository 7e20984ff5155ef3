//! Export run driver.

use std::sync::Arc;

use apsync_core::{AccessProvider, SyncConfig};
use apsync_repository::Repository;

use crate::classify::classify;
use crate::context::RunContext;
use crate::error::SyncError;
use crate::feedback::FeedbackSink;
use crate::filters::apply_filters;
use crate::grants::apply_grants;
use crate::masks::apply_masks;
use crate::shares::apply_shares;

pub struct ExportSyncer {
    repo: Arc<dyn Repository>,
    config: SyncConfig,
}

impl ExportSyncer {
    pub fn new(repo: Arc<dyn Repository>, config: SyncConfig) -> Self {
        Self { repo, config }
    }

    /// Bring the warehouse in line with `access_providers`.
    ///
    /// Each Access Provider yields one feedback record on `sink`. Masks,
    /// filters and shares go before grants: their who clauses name the
    /// roles the classifier settled on, not the ones that exist yet.
    pub async fn run(
        &self,
        access_providers: Vec<AccessProvider>,
        sink: &dyn FeedbackSink,
    ) -> Result<(), SyncError> {
        let mut ctx = RunContext::new(self.repo.clone(), self.config.clone())?;
        tracing::info!(access_providers = access_providers.len(), "starting export");

        let classification = classify(&mut ctx, access_providers).await?;
        for feedback in classification.rejected.iter().cloned() {
            sink.add_feedback(feedback);
        }

        apply_masks(&mut ctx, &classification, sink).await?;
        apply_filters(&mut ctx, &classification, sink).await?;
        apply_shares(&mut ctx, &classification, sink).await?;
        apply_grants(&mut ctx, &classification, sink).await?;

        tracing::info!("export finished");
        Ok(())
    }
}
