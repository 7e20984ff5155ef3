//! Shares applier.
//!
//! Every update creates a fresh share `<share prefix><name>_<random>`, points
//! it at the recipients' accounts and grants it the Access Provider's what.
//! Older shares generated for the same name are dropped afterwards.

use apsync_core::{AccessProvider, AccessProviderFeedback, GrantSet};

use crate::classify::{Action, Classification, Mutation};
use crate::context::RunContext;
use crate::error::SyncError;
use crate::expand::expand_what;
use crate::feedback::FeedbackSink;
use crate::merge::{self, GrantTarget};
use crate::naming::{is_generated_from, object_names};

const RESOURCE_TYPE: &str = "share";

pub async fn apply_shares(
    ctx: &mut RunContext,
    classification: &Classification,
    sink: &dyn FeedbackSink,
) -> Result<(), SyncError> {
    if classification.shares.is_empty() {
        return Ok(());
    }
    tracing::info!(shares = classification.shares.len(), "applying shares");

    for mutation in &classification.shares {
        let feedback = match mutation.action {
            Action::Delete => remove_share(ctx, mutation).await?,
            _ => upsert_share(ctx, mutation).await?,
        };
        sink.add_feedback(feedback);
    }
    Ok(())
}

fn share_feedback(ap: &AccessProvider, name: &str) -> AccessProviderFeedback {
    AccessProviderFeedback {
        actual_name: name.to_string(),
        external_id: Some(name.to_string()),
        resource_type: Some(RESOURCE_TYPE.to_string()),
        ..AccessProviderFeedback::new(&ap.id)
    }
}

fn fail(feedback: &mut AccessProviderFeedback, step: &str, err: impl Into<SyncError>) -> Result<(), SyncError> {
    let err = err.into();
    if err.is_fatal() {
        return Err(err);
    }
    tracing::error!(access_provider = %feedback.access_provider, step, error = %err, "share step failed");
    feedback.errors.push(format!("{}: {}", step, err));
    Ok(())
}

async fn drop_share(ctx: &RunContext, name: &str) -> Result<(), SyncError> {
    match ctx.repo().drop_share(name).await {
        Ok(()) => {
            tracing::info!(share = name, "dropped share");
            Ok(())
        }
        Err(err) if err.is_does_not_exist() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn remove_share(ctx: &mut RunContext, mutation: &Mutation) -> Result<AccessProviderFeedback, SyncError> {
    let ap = &mutation.access_provider;
    let Some(name) = ap.external_id.as_deref() else {
        tracing::warn!(access_provider = %ap.id, "share delete without external id, nothing to do");
        return Ok(AccessProviderFeedback::new(&ap.id));
    };
    let mut feedback = share_feedback(ap, name);
    if let Err(err) = drop_share(ctx, name).await {
        fail(&mut feedback, "drop share", err)?;
    }
    Ok(feedback)
}

async fn upsert_share(ctx: &mut RunContext, mutation: &Mutation) -> Result<AccessProviderFeedback, SyncError> {
    let ap = &mutation.access_provider;
    let prefix = ctx.config().share_prefix.clone();
    let (stem, name) = match object_names(ctx, &prefix, ap.hint()) {
        Ok(names) => names,
        Err(err) => {
            let mut feedback = AccessProviderFeedback::new(&ap.id);
            fail(&mut feedback, "derive share name", err)?;
            return Ok(feedback);
        }
    };
    let mut feedback = share_feedback(ap, &name);

    if let Err(err) = ctx.repo().create_share(&name).await {
        fail(&mut feedback, "create share", err)?;
        return Ok(feedback);
    }
    tracing::info!(access_provider = %ap.id, share = %name, "created share");

    if ap.who.recipients.is_empty() {
        feedback
            .warnings
            .push("share has no recipients".to_string());
    } else if let Err(err) = ctx
        .repo()
        .set_share_accounts(&name, &ap.who.recipients)
        .await
    {
        fail(&mut feedback, "set share accounts", err)?;
    }

    match expand_what(ctx, &ap.what).await {
        Ok(expansion) => {
            feedback.warnings.extend(expansion.warnings);
            let outcome = merge::merge(
                ctx.repo(),
                ctx.catalog(),
                GrantTarget::Share(&name),
                &GrantSet::new(),
                &expansion.grants,
            )
            .await?;
            feedback.errors.extend(outcome.errors);
            feedback.warnings.extend(outcome.warnings);
        }
        Err(err) => fail(&mut feedback, "expand what", err)?,
    }

    match ctx.repo().get_shares_with_prefix(&stem).await {
        Ok(existing) => {
            for stale in existing
                .iter()
                .filter(|s| **s != name && is_generated_from(&stem, s))
            {
                if let Err(err) = drop_share(ctx, stale).await {
                    fail(&mut feedback, "drop stale share", err)?;
                }
            }
        }
        Err(err) => fail(&mut feedback, "list shares", err)?,
    }

    if let Some(previous) = ap.external_id.as_deref().filter(|p| *p != name) {
        if let Err(err) = drop_share(ctx, previous).await {
            fail(&mut feedback, "drop previous share", err)?;
        }
    }
    Ok(feedback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::feedback::CollectingFeedbackSink;
    use apsync_core::{AccessProviderKind, DataObjectReference, SyncConfig, WhatItem};
    use apsync_repository::{DatabaseEntity, MemoryRepository};
    use std::sync::Arc;

    fn share_ap(external_id: Option<&str>) -> AccessProvider {
        let mut ap = AccessProvider::new("s", "Partner feed", AccessProviderKind::Share);
        ap.external_id = external_id.map(str::to_string);
        ap.who.recipients = vec!["PARTNER_ACCOUNT".to_string()];
        ap.what.push(WhatItem {
            data_object: DataObjectReference::new("DB.S.T", "table"),
            permissions: vec!["SELECT".to_string()],
        });
        ap
    }

    async fn run(repo: Arc<MemoryRepository>, aps: Vec<AccessProvider>) -> CollectingFeedbackSink {
        let mut ctx = RunContext::new(repo, SyncConfig::default()).unwrap();
        let classification = classify(&mut ctx, aps).await.unwrap();
        let sink = CollectingFeedbackSink::new();
        apply_shares(&mut ctx, &classification, &sink).await.unwrap();
        sink
    }

    #[tokio::test]
    async fn test_share_lifecycle() {
        let repo = Arc::new(MemoryRepository::new());
        repo.add_database(DatabaseEntity::new("DB"));

        let first = run(repo.clone(), vec![share_ap(None)]).await;
        let feedback = first.get("s").unwrap();
        assert!(feedback.is_success());
        let name = feedback.external_id.unwrap();
        assert!(name.starts_with("APSYNC_SHARE_PARTNER_FEED_"));
        assert_eq!(repo.share_accounts(&name), vec!["PARTNER_ACCOUNT"]);
        let calls = repo.calls();
        assert_eq!(
            &calls[2..],
            &[
                format!("GRANT USAGE ON DATABASE DB TO SHARE {}", name),
                format!("GRANT USAGE ON SCHEMA DB.S TO SHARE {}", name),
                format!("GRANT SELECT ON TABLE DB.S.T TO SHARE {}", name),
            ]
        );

        let second = run(repo.clone(), vec![share_ap(Some(&name))]).await;
        let renewed = second.get("s").unwrap().external_id.unwrap();
        assert_ne!(renewed, name);
        assert_eq!(repo.share_names(), vec![renewed.clone()]);

        let mut gone = share_ap(Some(&renewed));
        gone.delete = true;
        run(repo.clone(), vec![gone]).await;
        assert!(repo.share_names().is_empty());
    }
}
