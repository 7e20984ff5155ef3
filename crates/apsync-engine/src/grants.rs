//! Grants applier.
//!
//! Runs in two phases over the classified grant Access Providers: first every
//! deleted role is dropped, then the remaining roles are created, renamed or
//! updated in classification order. Each item gets exactly one feedback
//! record; a failure on one item never stops the others.

use std::collections::BTreeMap;

use apsync_core::{AccessProvider, AccessProviderFeedback, Grant, GrantSet, RoleId};
use apsync_repository::Grantee;

use crate::classify::{Action, Classification, Mutation};
use crate::context::RunContext;
use crate::error::SyncError;
use crate::expand::expand_what;
use crate::feedback::FeedbackSink;
use crate::merge::{self, GrantTarget};
use crate::rename::resolve_rename;
use crate::who::resolve_inherited;

/// Apply every grant mutation of a classification.
pub async fn apply_grants(
    ctx: &mut RunContext,
    classification: &Classification,
    sink: &dyn FeedbackSink,
) -> Result<(), SyncError> {
    let (deletes, upserts): (Vec<&Mutation>, Vec<&Mutation>) = classification
        .grants
        .iter()
        .partition(|m| m.action == Action::Delete);

    tracing::info!(roles = deletes.len(), "removing roles");
    for mutation in deletes {
        let feedback = remove_role(ctx, classification, mutation).await?;
        sink.add_feedback(feedback);
    }

    tracing::info!(roles = upserts.len(), "creating and updating roles");
    for mutation in upserts {
        let feedback = upsert_role(ctx, classification, mutation).await?;
        sink.add_feedback(feedback);
    }
    Ok(())
}

fn role_feedback(ap: &AccessProvider, role: &RoleId) -> AccessProviderFeedback {
    AccessProviderFeedback {
        actual_name: role.name().to_string(),
        external_id: Some(role.external_id()),
        resource_type: Some(role.resource_type().to_string()),
        ..AccessProviderFeedback::new(&ap.id)
    }
}

/// Record a non-fatal error on the feedback, or hand a fatal one back.
fn record(
    feedback: &mut AccessProviderFeedback,
    step: &str,
    err: impl Into<SyncError>,
) -> Result<(), SyncError> {
    let err = err.into();
    if err.is_fatal() {
        return Err(err);
    }
    tracing::error!(access_provider = %feedback.access_provider, step, error = %err, "grant update step failed");
    feedback.errors.push(format!("{}: {}", step, err));
    Ok(())
}

async fn remove_role(
    ctx: &mut RunContext,
    classification: &Classification,
    mutation: &Mutation,
) -> Result<AccessProviderFeedback, SyncError> {
    let ap = &mutation.access_provider;
    let Some(role) = &mutation.role else {
        return Ok(AccessProviderFeedback::new(&ap.id));
    };
    let mut feedback = role_feedback(ap, role);

    if classification.is_claimed_by_other(role, &ap.id) {
        let message = format!(
            "role {} is used by another access provider, not dropping it",
            role.qualified_name()
        );
        tracing::warn!(access_provider = %ap.id, "{}", message);
        feedback.warnings.push(message);
        return Ok(feedback);
    }

    match ctx.repo().drop_role(role).await {
        Ok(()) => {
            tracing::info!(access_provider = %ap.id, role = %role, "dropped role");
            ctx.mark_dropped(role);
        }
        Err(err) if err.is_does_not_exist() => {
            tracing::info!(access_provider = %ap.id, role = %role, "role already gone");
            ctx.mark_dropped(role);
        }
        Err(err) => record(&mut feedback, "drop role", err)?,
    }
    Ok(feedback)
}

async fn upsert_role(
    ctx: &mut RunContext,
    classification: &Classification,
    mutation: &Mutation,
) -> Result<AccessProviderFeedback, SyncError> {
    let ap = &mutation.access_provider;
    let Some(role) = &mutation.role else {
        return Ok(AccessProviderFeedback::new(&ap.id).with_error("no role name was derived"));
    };
    let mut feedback = role_feedback(ap, role);

    let is_new = match &mutation.action {
        Action::Create => {
            if ctx.role_exists(role).await? {
                tracing::info!(access_provider = %ap.id, role = %role, "role already exists, adopting it");
                false
            } else if ap.delete_locked {
                tracing::info!(access_provider = %ap.id, role = %role, "role is delete locked and absent, skipping");
                feedback.external_id = None;
                return Ok(feedback);
            } else {
                match ctx.repo().create_role(role).await {
                    Ok(()) => {
                        tracing::info!(access_provider = %ap.id, role = %role, "created role");
                        ctx.mark_created(role);
                        true
                    }
                    Err(err) => {
                        record(&mut feedback, "create role", err)?;
                        return Ok(feedback);
                    }
                }
            }
        }
        Action::Rename { old } => {
            let claimed = classification.is_claimed_by_other(old, &ap.id);
            match resolve_rename(ctx, old, role, claimed).await {
                Ok(outcome) => {
                    tracing::debug!(access_provider = %ap.id, outcome = ?outcome, "resolved rename");
                    outcome.is_new()
                }
                Err(err) => {
                    record(&mut feedback, "rename role", err)?;
                    return Ok(feedback);
                }
            }
        }
        Action::Update => {
            if ctx.role_exists(role).await? {
                false
            } else {
                let message = format!("role {} was missing and is recreated", role.qualified_name());
                tracing::warn!(access_provider = %ap.id, "{}", message);
                feedback.warnings.push(message);
                match ctx.repo().create_role(role).await {
                    Ok(()) => {
                        ctx.mark_created(role);
                        true
                    }
                    Err(err) => {
                        record(&mut feedback, "create role", err)?;
                        return Ok(feedback);
                    }
                }
            }
        }
        Action::Delete => return Ok(feedback),
    };

    update_role(ctx, classification, ap, role, is_new, &mut feedback).await?;
    Ok(feedback)
}

/// Comment, what, who and tags of a role, each gated by its lock.
async fn update_role(
    ctx: &mut RunContext,
    classification: &Classification,
    ap: &AccessProvider,
    role: &RoleId,
    is_new: bool,
    feedback: &mut AccessProviderFeedback,
) -> Result<(), SyncError> {
    if ap.fully_unlocked() {
        let comment = format!("Created by apsync from access provider {}", ap.name);
        if let Err(err) = ctx.repo().comment_role_if_exists(role, &comment).await {
            record(feedback, "comment role", err)?;
        }
    }

    if !ap.what_locked {
        update_what(ctx, ap, role, is_new, feedback).await?;
    }

    if !ap.who_locked || !ap.inheritance_locked {
        update_who(ctx, classification, ap, role, is_new, feedback).await?;
    }

    if ctx.config().tags.is_configured() {
        update_tags(ctx, ap, role, feedback).await?;
    }
    Ok(())
}

async fn update_what(
    ctx: &mut RunContext,
    ap: &AccessProvider,
    role: &RoleId,
    is_new: bool,
    feedback: &mut AccessProviderFeedback,
) -> Result<(), SyncError> {
    let expansion = match expand_what(ctx, &ap.what).await {
        Ok(expansion) => expansion,
        Err(err) => return record(feedback, "expand what", err),
    };
    feedback.warnings.extend(expansion.warnings);
    let expected = expansion.grants;

    let found = if is_new {
        GrantSet::new()
    } else {
        let kept_futures = revoke_stale_future_grants(ctx, role, &expected, feedback).await?;
        let mut found = match merge::found_role_grants(ctx.repo(), ctx.catalog(), role).await {
            Ok(found) => found,
            Err(err) => return record(feedback, "list grants", err),
        };
        // Future grants are listed separately from the role's grants.
        for grant in kept_futures {
            found.add(grant);
        }
        found
    };

    let outcome = merge::merge(
        ctx.repo(),
        ctx.catalog(),
        GrantTarget::Role(role),
        &found,
        &expected,
    )
    .await?;
    feedback.errors.extend(outcome.errors);
    feedback.warnings.extend(outcome.warnings);
    Ok(())
}

/// Revoke future grants no longer expected and return the ones still held.
async fn revoke_stale_future_grants(
    ctx: &mut RunContext,
    role: &RoleId,
    expected: &GrantSet,
    feedback: &mut AccessProviderFeedback,
) -> Result<Vec<Grant>, SyncError> {
    let futures = match ctx.repo().get_future_grants_to_role(role).await {
        Ok(futures) => futures,
        Err(err) => {
            record(feedback, "list future grants", err)?;
            return Ok(Vec::new());
        }
    };
    let (kept, stale): (Vec<Grant>, Vec<Grant>) =
        futures.into_iter().partition(|g| expected.contains(g));
    for grant in &stale {
        match ctx.repo().execute_revoke_on_role(grant, role).await {
            Ok(()) => tracing::debug!(role = %role, grant = %grant, "revoked stale future grant"),
            Err(err) => record(feedback, "revoke future grant", err)?,
        }
    }
    Ok(kept)
}

async fn update_who(
    ctx: &mut RunContext,
    classification: &Classification,
    ap: &AccessProvider,
    role: &RoleId,
    is_new: bool,
    feedback: &mut AccessProviderFeedback,
) -> Result<(), SyncError> {
    let holders = if is_new {
        Vec::new()
    } else {
        match ctx.repo().get_grants_of_role(role).await {
            Ok(holders) => holders,
            Err(err) => return record(feedback, "list role holders", err),
        }
    };

    let mut current_users = Vec::new();
    let mut current_roles = Vec::new();
    for holder in holders {
        match holder.grantee() {
            Grantee::User(user) => current_users.push(user),
            Grantee::Role(holder) => current_roles.push(holder),
            _ => {}
        }
    }

    if !ap.who_locked {
        let to_add: Vec<String> = dedup(ap.who.users.iter().filter(|u| !current_users.contains(u)));
        let to_remove: Vec<String> = dedup(current_users.iter().filter(|u| !ap.who.users.contains(u)));
        if !to_add.is_empty() {
            if let Err(err) = ctx.repo().grant_users_to_role(role, &to_add).await {
                record(feedback, "grant role to users", err)?;
            }
        }
        if !to_remove.is_empty() {
            if let Err(err) = ctx.repo().revoke_users_from_role(role, &to_remove).await {
                record(feedback, "revoke role from users", err)?;
            }
        }
        for group in &ap.who.groups {
            let message = format!("group {} cannot be granted a role, ignoring it", group);
            tracing::warn!(access_provider = %ap.id, "{}", message);
            feedback.warnings.push(message);
        }
    }

    if !ap.inheritance_locked {
        let mut expected = Vec::new();
        for entry in &ap.who.inherit_from {
            match resolve_inherited(entry, &classification.roles_by_id) {
                Ok(inherited) if ctx.is_ignored_linked_role(&inherited) => {
                    tracing::debug!(role = %inherited, "ignoring linked role");
                }
                Ok(inherited) => {
                    if !expected.contains(&inherited) {
                        expected.push(inherited);
                    }
                }
                Err(err) => {
                    let message = format!("skipping inherited role {}: {}", entry, err);
                    tracing::warn!(access_provider = %ap.id, "{}", message);
                    feedback.warnings.push(message);
                }
            }
        }
        current_roles.retain(|r| !ctx.is_ignored_linked_role(r));

        // Account roles first, then database and application roles.
        let order = |r: &RoleId| match r {
            RoleId::Account { .. } => 0,
            RoleId::Database { .. } => 1,
            RoleId::Application { .. } => 2,
        };
        expected.sort_by_key(order);
        current_roles.sort_by_key(order);

        for grantee in expected.iter().filter(|r| !current_roles.contains(r)) {
            match ctx.repo().grant_role_to_role(role, grantee).await {
                Ok(()) => tracing::debug!(role = %role, grantee = %grantee, "granted role"),
                Err(err) => record(feedback, "grant role to role", err)?,
            }
        }
        for grantee in current_roles.iter().filter(|r| !expected.contains(r)) {
            match ctx.repo().revoke_role_from_role(role, grantee).await {
                Ok(()) => tracing::debug!(role = %role, grantee = %grantee, "revoked role"),
                Err(err) => record(feedback, "revoke role from role", err)?,
            }
        }
    }
    Ok(())
}

fn dedup<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}

async fn update_tags(
    ctx: &mut RunContext,
    ap: &AccessProvider,
    role: &RoleId,
    feedback: &mut AccessProviderFeedback,
) -> Result<(), SyncError> {
    let Some(owner) = ap.owners.first() else {
        return Ok(());
    };
    let config = &ctx.config().tags;
    let mut tags = BTreeMap::new();
    for (tag, value) in [
        (&config.owner_email, &owner.email),
        (&config.owner_name, &owner.account_name),
        (&config.owner_group, &owner.group_name),
    ] {
        if let (Some(tag), Some(value)) = (tag, value) {
            tags.insert(tag.clone(), value.clone());
        }
    }
    if tags.is_empty() {
        return Ok(());
    }
    if let Err(err) = ctx.repo().set_role_tags(role, &tags).await {
        record(feedback, "set owner tags", err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::feedback::CollectingFeedbackSink;
    use apsync_core::{
        AccessProviderKind, DataObjectReference, Grant, ObjectKind, Owner, OwnerTagConfig,
        SyncConfig, WhatItem,
    };
    use apsync_repository::{DatabaseEntity, GrantOfRole, GrantToRole, MemoryRepository};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn grant_ap(id: &str, name: &str) -> AccessProvider {
        let mut ap = AccessProvider::new(id, name, AccessProviderKind::Grant);
        ap.what.push(WhatItem {
            data_object: DataObjectReference::new("DB", "database"),
            permissions: vec!["USAGE".to_string()],
        });
        ap
    }

    async fn run(
        repo: Arc<MemoryRepository>,
        config: SyncConfig,
        aps: Vec<AccessProvider>,
    ) -> CollectingFeedbackSink {
        let mut ctx = RunContext::new(repo, config).unwrap();
        let classification = classify(&mut ctx, aps).await.unwrap();
        let sink = CollectingFeedbackSink::new();
        apply_grants(&mut ctx, &classification, &sink).await.unwrap();
        sink
    }

    fn seeded() -> Arc<MemoryRepository> {
        let repo = MemoryRepository::new();
        repo.add_database(DatabaseEntity::new("DB"));
        Arc::new(repo)
    }

    #[tokio::test]
    async fn test_update_reconciles_grants_and_users() {
        let repo = seeded();
        let role = RoleId::account("AP1");
        repo.add_role(role.clone(), "SYSADMIN");
        repo.add_role_grant(&role, GrantToRole::new("USAGE", "DATABASE", "OLD"));
        repo.add_role_grant(&role, GrantToRole::new("OWNERSHIP", "TABLE", "DB.S.T"));
        repo.add_role_holder(&role, GrantOfRole::new("USER", "bob"));

        let mut ap = grant_ap("a", "AP1");
        ap.external_id = Some("AP1".to_string());
        ap.who.users.push("alice".to_string());
        let sink = run(repo.clone(), SyncConfig::default(), vec![ap]).await;

        let calls: Vec<String> = repo
            .calls()
            .into_iter()
            .filter(|c| !c.starts_with("COMMENT"))
            .collect();
        assert_eq!(
            calls,
            vec![
                "GRANT USAGE ON DATABASE DB TO ROLE AP1",
                "REVOKE USAGE ON DATABASE OLD FROM ROLE AP1",
                "GRANT ROLE AP1 TO USER alice",
                "REVOKE ROLE AP1 FROM USER bob",
            ]
        );
        let feedback = sink.get("a").unwrap();
        assert!(feedback.is_success());
        assert_eq!(feedback.external_id.as_deref(), Some("AP1"));
        assert_eq!(feedback.resource_type.as_deref(), Some("role"));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_role() {
        let repo = seeded();
        let mut ap = grant_ap("a", "AP1");
        ap.external_id = Some("AP1".to_string());
        ap.delete = true;

        let sink = run(repo.clone(), SyncConfig::default(), vec![ap]).await;

        let feedback = sink.get("a").unwrap();
        assert!(feedback.is_success());
        assert_eq!(feedback.actual_name, "AP1");
        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_locked_absent_role_is_skipped() {
        let repo = seeded();
        let mut ap = grant_ap("a", "AP1");
        ap.delete_locked = true;

        let sink = run(repo.clone(), SyncConfig::default(), vec![ap]).await;

        assert!(repo.calls().is_empty());
        let feedback = sink.get("a").unwrap();
        assert!(feedback.is_success());
        assert_eq!(feedback.external_id, None);
    }

    #[tokio::test]
    async fn test_locks_gate_updates() {
        let repo = seeded();
        let role = RoleId::account("AP1");
        repo.add_role(role.clone(), "SYSADMIN");
        repo.add_role_holder(&role, GrantOfRole::new("USER", "bob"));

        let mut ap = grant_ap("a", "AP1");
        ap.external_id = Some("AP1".to_string());
        ap.what_locked = true;
        ap.who_locked = true;
        ap.inheritance_locked = true;
        run(repo.clone(), SyncConfig::default(), vec![ap]).await;

        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inheritance_by_id_and_ignored_roles() {
        let repo = seeded();
        let parent = RoleId::database("DB", "PARENT");
        repo.add_role(parent.clone(), "SYSADMIN");
        let legacy = RoleId::account("LEGACY_ADMIN");
        repo.add_role(legacy.clone(), "SYSADMIN");
        let role = RoleId::account("CHILD");
        repo.add_role(role.clone(), "SYSADMIN");
        repo.add_role_holder(&role, GrantOfRole::for_role(&legacy));

        let mut parent_ap = grant_ap("p", "DB.PARENT");
        parent_ap.role_scope = Some(apsync_core::RoleScope::DatabaseRole);
        parent_ap.external_id = Some(parent.external_id());
        let mut child = grant_ap("c", "CHILD");
        child.external_id = Some("CHILD".to_string());
        child.who.inherit_from.push("ID:p".to_string());

        let config = SyncConfig {
            ignore_linked_roles: vec!["^LEGACY_.*".to_string()],
            ..SyncConfig::default()
        };
        let sink = run(repo.clone(), config, vec![parent_ap, child]).await;

        assert!(repo
            .calls()
            .contains(&"GRANT ROLE CHILD TO DATABASE ROLE DB.PARENT".to_string()));
        assert!(!repo.calls().iter().any(|c| c.contains("LEGACY_ADMIN")));
        assert!(sink.get("c").unwrap().is_success());
    }

    #[tokio::test]
    async fn test_failed_create_skips_update() {
        let repo = seeded();
        repo.fail_on("create_role", "AP1");
        let mut ap = grant_ap("a", "AP1");
        ap.who.users.push("alice".to_string());

        let sink = run(repo.clone(), SyncConfig::default(), vec![ap]).await;

        assert!(repo.calls().is_empty());
        assert_eq!(sink.get("a").unwrap().errors.len(), 1);
    }

    #[tokio::test]
    async fn test_future_grants_and_owner_tags() {
        let repo = seeded();
        let role = RoleId::account("AP1");
        repo.add_role(role.clone(), "SYSADMIN");
        repo.add_future_grant(
            &role,
            Grant::new("SELECT", ObjectKind::FutureTables, "DB.OLD"),
        );

        let mut ap = grant_ap("a", "AP1");
        ap.external_id = Some("AP1".to_string());
        ap.owners.push(Owner {
            email: Some("owner@example.com".to_string()),
            ..Owner::default()
        });
        let config = SyncConfig {
            tags: OwnerTagConfig {
                owner_email: Some("GOV.TAGS.OWNER_EMAIL".to_string()),
                ..OwnerTagConfig::default()
            },
            ..SyncConfig::default()
        };
        run(repo.clone(), config, vec![ap]).await;

        let calls = repo.calls();
        assert!(calls.contains(&"REVOKE SELECT ON FUTURE TABLES DB.OLD FROM ROLE AP1".to_string()));
        assert!(calls.contains(
            &"SET TAG GOV.TAGS.OWNER_EMAIL = 'owner@example.com' ON ROLE AP1".to_string()
        ));
    }
}
