//! Grant diff and merge.
//!
//! Brings the grants held by a role or share in line with the expected set:
//! one grant statement per missing grant in set order, then one revoke per
//! stale grant in reverse set order. A failed statement is recorded and the
//! merge carries on with the next one.

use std::fmt;

use apsync_core::{Grant, GrantDiff, GrantSet, ObjectKind, PermissionCatalog, RoleId};
use apsync_repository::{GrantToRole, RepoError, Repository};

use crate::error::SyncError;
use crate::expand::IMPORTED_PRIVILEGES;

const OWNERSHIP: &str = "OWNERSHIP";

/// Receiver of the merged grants.
#[derive(Debug, Clone, Copy)]
pub enum GrantTarget<'a> {
    Role(&'a RoleId),
    Share(&'a str),
}

impl fmt::Display for GrantTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantTarget::Role(role) => write!(f, "role {}", role.qualified_name()),
            GrantTarget::Share(share) => write!(f, "share {}", share),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub granted: usize,
    pub revoked: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// The subset of listed grants this engine manages.
///
/// Ownership and grants on kinds outside the permission catalog are left
/// alone. IMPORTED PRIVILEGES come back as plain database grants and are
/// mapped onto the shared-database kind expansion produces.
pub fn managed_grants(
    catalog: &PermissionCatalog,
    listed: impl IntoIterator<Item = Grant>,
) -> GrantSet {
    listed
        .into_iter()
        .filter(|g| g.permission != OWNERSHIP)
        .map(|g| {
            if g.on_type == ObjectKind::Database && g.permission == IMPORTED_PRIVILEGES {
                Grant::new(&g.permission, ObjectKind::SharedDatabase, g.on)
            } else {
                g
            }
        })
        .filter(|g| catalog.is_valid(&g.on_type, &g.permission))
        .collect()
}

/// Managed grants currently held by a role.
pub async fn found_role_grants(
    repo: &dyn Repository,
    catalog: &PermissionCatalog,
    role: &RoleId,
) -> Result<GrantSet, RepoError> {
    let listed = repo.get_grants_to_role(role).await?;
    Ok(managed_grants(
        catalog,
        listed.iter().map(GrantToRole::to_grant),
    ))
}

/// Apply the difference between `found` and `expected` to `target`.
pub async fn merge(
    repo: &dyn Repository,
    catalog: &PermissionCatalog,
    target: GrantTarget<'_>,
    found: &GrantSet,
    expected: &GrantSet,
) -> Result<MergeOutcome, SyncError> {
    let diff = GrantDiff::between(found, expected);
    let mut outcome = MergeOutcome::default();
    if diff.is_empty() {
        tracing::debug!(target = %target, "grants already up to date");
        return Ok(outcome);
    }

    for grant in diff.to_add.iter() {
        if !catalog.is_valid(&grant.on_type, &grant.permission) {
            let message = format!(
                "permission {} is not valid on {}, not granting it to {}",
                grant.permission, grant.on_type, target
            );
            tracing::warn!("{}", message);
            outcome.warnings.push(message);
            continue;
        }
        let result = match target {
            GrantTarget::Role(role) => repo.execute_grant_on_role(grant, role).await,
            GrantTarget::Share(share) => repo.execute_grant_on_share(grant, share).await,
        };
        match result {
            Ok(()) => {
                tracing::debug!(target = %target, grant = %grant, "granted");
                outcome.granted += 1;
            }
            Err(err) => record(&mut outcome, "grant", grant, target, err)?,
        }
    }

    for grant in diff.to_remove.iter().rev() {
        let result = match target {
            GrantTarget::Role(role) => repo.execute_revoke_on_role(grant, role).await,
            GrantTarget::Share(share) => repo.execute_revoke_on_share(grant, share).await,
        };
        match result {
            Ok(()) => {
                tracing::debug!(target = %target, grant = %grant, "revoked");
                outcome.revoked += 1;
            }
            Err(err) if err.is_does_not_exist() => {
                tracing::debug!(target = %target, grant = %grant, "object gone, nothing to revoke");
                outcome.revoked += 1;
            }
            Err(err) => record(&mut outcome, "revoke", grant, target, err)?,
        }
    }

    tracing::info!(
        target = %target,
        granted = outcome.granted,
        revoked = outcome.revoked,
        failed = outcome.errors.len(),
        "merged grants"
    );
    Ok(outcome)
}

fn record(
    outcome: &mut MergeOutcome,
    verb: &str,
    grant: &Grant,
    target: GrantTarget<'_>,
    err: RepoError,
) -> Result<(), SyncError> {
    let err = SyncError::from(err);
    if err.is_fatal() {
        return Err(err);
    }
    tracing::error!(target = %target, grant = %grant, error = %err, "{} failed", verb);
    outcome
        .errors
        .push(format!("failed to {} {} on {}: {}", verb, grant, target, err));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apsync_repository::MemoryRepository;
    use pretty_assertions::assert_eq;

    fn set(grants: &[(&str, ObjectKind, &str)]) -> GrantSet {
        grants
            .iter()
            .map(|(p, k, on)| Grant::new(p, k.clone(), *on))
            .collect()
    }

    #[tokio::test]
    async fn test_merge_adds_then_revokes_in_reverse() {
        let repo = MemoryRepository::new();
        let role = RoleId::account("AP1");
        repo.add_role(role.clone(), "SYSADMIN");
        let catalog = PermissionCatalog::new().unwrap();

        let found = set(&[
            ("USAGE", ObjectKind::Database, "OLD"),
            ("USAGE", ObjectKind::Schema, "OLD.S"),
        ]);
        let expected = set(&[
            ("USAGE", ObjectKind::Database, "DB"),
            ("SELECT", ObjectKind::Table, "DB.S.T"),
        ]);
        let outcome = merge(&repo, &catalog, GrantTarget::Role(&role), &found, &expected)
            .await
            .unwrap();

        assert_eq!(outcome.granted, 2);
        assert_eq!(outcome.revoked, 2);
        assert_eq!(
            repo.calls(),
            vec![
                "GRANT USAGE ON DATABASE DB TO ROLE AP1",
                "GRANT SELECT ON TABLE DB.S.T TO ROLE AP1",
                "REVOKE USAGE ON SCHEMA OLD.S FROM ROLE AP1",
                "REVOKE USAGE ON DATABASE OLD FROM ROLE AP1",
            ]
        );
    }

    #[tokio::test]
    async fn test_second_merge_is_a_noop() {
        let repo = MemoryRepository::new();
        let role = RoleId::account("AP1");
        repo.add_role(role.clone(), "SYSADMIN");
        let catalog = PermissionCatalog::new().unwrap();
        let expected = set(&[
            ("USAGE", ObjectKind::Database, "DB"),
            ("IMPORTED PRIVILEGES", ObjectKind::SharedDatabase, "SHARED"),
        ]);

        let found = found_role_grants(&repo, &catalog, &role).await.unwrap();
        merge(&repo, &catalog, GrantTarget::Role(&role), &found, &expected)
            .await
            .unwrap();
        repo.clear_calls();

        let found = found_role_grants(&repo, &catalog, &role).await.unwrap();
        let outcome = merge(&repo, &catalog, GrantTarget::Role(&role), &found, &expected)
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::default());
        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_and_failing_grants_are_reported() {
        let repo = MemoryRepository::new();
        let role = RoleId::account("AP1");
        repo.add_role(role.clone(), "SYSADMIN");
        repo.fail_on("execute_grant_on_role", "AP1");
        let catalog = PermissionCatalog::new().unwrap();

        let expected = set(&[
            ("FLY", ObjectKind::Table, "DB.S.T"),
            ("SELECT", ObjectKind::Table, "DB.S.T"),
        ]);
        let outcome = merge(
            &repo,
            &catalog,
            GrantTarget::Role(&role),
            &GrantSet::new(),
            &expected,
        )
        .await
        .unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.granted, 0);
    }

    #[test]
    fn test_managed_grants_skip_ownership_and_unknown_kinds() {
        let catalog = PermissionCatalog::new().unwrap();
        let managed = managed_grants(
            &catalog,
            vec![
                Grant::new("OWNERSHIP", ObjectKind::Table, "DB.S.T"),
                Grant::new("READ", ObjectKind::Other("STAGE".to_string()), "DB.S.ST"),
                Grant::new("IMPORTED PRIVILEGES", ObjectKind::Database, "SHARED"),
                Grant::new("SELECT", ObjectKind::Table, "DB.S.T"),
            ],
        );
        let rendered: Vec<String> = managed.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "IMPORTED PRIVILEGES ON DATABASE SHARED",
                "SELECT ON TABLE DB.S.T",
            ]
        );
    }
}
