//! Rename resolution for grant roles.
//!
//! Decides what happens to the native role when an Access Provider's derived
//! name moved away from its recorded one. Only the role itself is touched;
//! grants are reconciled afterwards by the common update.

use apsync_core::RoleId;

use crate::context::RunContext;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    /// The old role was renamed in place.
    Renamed,
    /// A fresh role was created; the old one stayed or was dropped.
    CreatedFresh,
    /// The new role already existed and was taken over.
    Adopted,
    /// The new role already existed; the unclaimed old one was dropped.
    AdoptedAfterDroppingOld,
    /// The new role exists and the old one belongs to someone else.
    Skipped,
}

impl RenameOutcome {
    /// Whether the role started empty in this run.
    pub fn is_new(&self) -> bool {
        matches!(self, RenameOutcome::CreatedFresh)
    }
}

/// Move an Access Provider from `old` to `new`.
///
/// `old_claimed` tells whether another Access Provider of this run ends up
/// on `old`, in which case it must not be renamed or dropped.
pub async fn resolve_rename(
    ctx: &mut RunContext,
    old: &RoleId,
    new: &RoleId,
    old_claimed: bool,
) -> Result<RenameOutcome, SyncError> {
    let new_exists = ctx.role_exists(new).await?;
    let old_exists = ctx.role_exists(old).await?;

    if old.namespace() != new.namespace() {
        tracing::info!(old = %old, new = %new, "role moves to another namespace");
        let outcome = if new_exists {
            RenameOutcome::Adopted
        } else {
            create(ctx, new).await?;
            RenameOutcome::CreatedFresh
        };
        if old_exists && !old_claimed {
            drop_old(ctx, old).await?;
        }
        return Ok(outcome);
    }

    match (new_exists, old_exists, old_claimed) {
        (false, true, false) => {
            ctx.repo().rename_role(old, new).await?;
            ctx.mark_dropped(old);
            ctx.mark_created(new);
            tracing::info!(old = %old, new = %new, "renamed role");
            Ok(RenameOutcome::Renamed)
        }
        (false, _, _) => {
            create(ctx, new).await?;
            Ok(RenameOutcome::CreatedFresh)
        }
        (true, _, true) => {
            tracing::info!(old = %old, new = %new, "new role exists and old role is claimed, nothing to rename");
            Ok(RenameOutcome::Skipped)
        }
        (true, true, false) => {
            drop_old(ctx, old).await?;
            tracing::info!(old = %old, new = %new, "adopted existing role");
            Ok(RenameOutcome::AdoptedAfterDroppingOld)
        }
        (true, false, false) => {
            tracing::info!(old = %old, new = %new, "old role is gone, adopted existing role");
            Ok(RenameOutcome::Adopted)
        }
    }
}

async fn create(ctx: &mut RunContext, role: &RoleId) -> Result<(), SyncError> {
    ctx.repo().create_role(role).await?;
    ctx.mark_created(role);
    tracing::info!(role = %role, "created role");
    Ok(())
}

async fn drop_old(ctx: &mut RunContext, role: &RoleId) -> Result<(), SyncError> {
    match ctx.repo().drop_role(role).await {
        Ok(()) => {}
        Err(err) if err.is_does_not_exist() => {
            tracing::debug!(role = %role, "old role already gone");
        }
        Err(err) => return Err(err.into()),
    }
    ctx.mark_dropped(role);
    tracing::info!(role = %role, "dropped old role");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apsync_core::SyncConfig;
    use apsync_repository::MemoryRepository;
    use std::sync::Arc;

    async fn run(existing: &[&RoleId], old_claimed: bool) -> (RenameOutcome, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        for role in existing {
            repo.add_role((*role).clone(), "SYSADMIN");
        }
        let mut ctx = RunContext::new(repo.clone(), SyncConfig::default()).unwrap();
        let outcome = resolve_rename(
            &mut ctx,
            &RoleId::account("OLD"),
            &RoleId::account("NEW"),
            old_claimed,
        )
        .await
        .unwrap();
        (outcome, repo)
    }

    #[tokio::test]
    async fn test_rename_matrix() {
        let old = RoleId::account("OLD");
        let new = RoleId::account("NEW");

        let (outcome, repo) = run(&[&old], false).await;
        assert_eq!(outcome, RenameOutcome::Renamed);
        assert_eq!(repo.calls(), vec!["RENAME ROLE OLD TO NEW"]);

        let (outcome, repo) = run(&[&old], true).await;
        assert_eq!(outcome, RenameOutcome::CreatedFresh);
        assert_eq!(repo.calls(), vec!["CREATE ROLE NEW"]);
        assert!(repo.has_role(&old));

        let (outcome, repo) = run(&[&old, &new], true).await;
        assert_eq!(outcome, RenameOutcome::Skipped);
        assert!(repo.calls().is_empty());

        let (outcome, repo) = run(&[&old, &new], false).await;
        assert_eq!(outcome, RenameOutcome::AdoptedAfterDroppingOld);
        assert_eq!(repo.calls(), vec!["DROP ROLE OLD"]);
    }

    #[tokio::test]
    async fn test_rename_when_old_is_gone() {
        let (outcome, repo) = run(&[], false).await;
        assert_eq!(outcome, RenameOutcome::CreatedFresh);
        assert_eq!(repo.calls(), vec!["CREATE ROLE NEW"]);

        let (outcome, repo) = run(&[&RoleId::account("NEW")], false).await;
        assert_eq!(outcome, RenameOutcome::Adopted);
        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cross_namespace_creates_and_drops_old() {
        let repo = Arc::new(MemoryRepository::new());
        let old = RoleId::account("READERS");
        let new = RoleId::database("DB", "READERS");
        repo.add_role(old.clone(), "SYSADMIN");
        let mut ctx = RunContext::new(repo.clone(), SyncConfig::default()).unwrap();

        let outcome = resolve_rename(&mut ctx, &old, &new, false).await.unwrap();

        assert!(outcome.is_new());
        assert_eq!(
            repo.calls(),
            vec!["CREATE DATABASE ROLE DB.READERS", "DROP ROLE READERS"]
        );
        assert!(!ctx.role_exists(&old).await.unwrap());
    }
}
