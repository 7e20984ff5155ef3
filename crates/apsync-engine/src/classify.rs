//! Mutation classifier.
//!
//! Decides, for every Access Provider, whether the run creates, updates,
//! renames or deletes its native object, and fixes the final role name of
//! every grant before any applier runs.

use std::collections::HashMap;

use apsync_core::locking::is_system_role;
use apsync_core::{AccessProvider, AccessProviderFeedback, AccessProviderKind, RoleId};

use crate::context::RunContext;
use crate::error::SyncError;
use crate::naming;

/// Upper bound on regenerations when a rename target is taken.
const MAX_RENAME_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Rename { old: RoleId },
    Delete,
}

/// One Access Provider with its classified action.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub access_provider: AccessProvider,
    pub action: Action,
    /// Final role, for grant Access Providers. For deletes this is the role
    /// being dropped.
    pub role: Option<RoleId>,
}

impl Mutation {
    pub fn id(&self) -> &str {
        &self.access_provider.id
    }
}

/// Output of the classifier.
#[derive(Debug, Default)]
pub struct Classification {
    pub grants: Vec<Mutation>,
    pub masks: Vec<Mutation>,
    pub filters: Vec<Mutation>,
    pub shares: Vec<Mutation>,
    /// Access Provider id to final grant role.
    pub roles_by_id: HashMap<String, RoleId>,
    /// Feedback for items rejected during classification.
    pub rejected: Vec<AccessProviderFeedback>,
}

impl Classification {
    /// Whether `role` is the final role of an Access Provider other than `id`.
    pub fn is_claimed_by_other(&self, role: &RoleId, id: &str) -> bool {
        self.roles_by_id
            .iter()
            .any(|(other, claimed)| other != id && claimed == role)
    }

    pub fn len(&self) -> usize {
        self.grants.len() + self.masks.len() + self.filters.len() + self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Classify Access Providers in input order.
///
/// Per-item problems become entries in [`Classification::rejected`]. Only a
/// failure to list existing roles is returned as an error.
pub async fn classify(
    ctx: &mut RunContext,
    access_providers: Vec<AccessProvider>,
) -> Result<Classification, SyncError> {
    let mut out = Classification::default();

    reserve_external_ids(ctx, &access_providers);

    for ap in access_providers {
        if !ap.kind.is_supported() {
            tracing::warn!(access_provider = %ap.id, kind = ?ap.kind, "unsupported access provider kind");
            out.rejected.push(
                AccessProviderFeedback::new(&ap.id)
                    .with_error(format!("unsupported access provider action {:?}", ap.kind)),
            );
            continue;
        }

        if ap.kind != AccessProviderKind::Grant {
            let action = if ap.delete {
                Action::Delete
            } else if ap.external_id.is_none() {
                Action::Create
            } else {
                Action::Update
            };
            let mutation = Mutation {
                access_provider: ap,
                action,
                role: None,
            };
            match mutation.access_provider.kind {
                AccessProviderKind::Mask => out.masks.push(mutation),
                AccessProviderKind::Filtered => out.filters.push(mutation),
                _ => out.shares.push(mutation),
            }
            continue;
        }

        match classify_grant(ctx, &ap).await {
            Ok(Some((action, role))) => {
                if action != Action::Delete {
                    out.roles_by_id.insert(ap.id.clone(), role.clone());
                }
                tracing::debug!(access_provider = %ap.id, role = %role, action = ?action, "classified");
                out.grants.push(Mutation {
                    access_provider: ap,
                    action,
                    role: Some(role),
                });
            }
            Ok(None) => {
                tracing::warn!(access_provider = %ap.id, "delete requested without external id, nothing to do");
                out.rejected.push(AccessProviderFeedback::new(&ap.id));
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                tracing::error!(access_provider = %ap.id, error = %err, "classification failed");
                out.rejected
                    .push(AccessProviderFeedback::new(&ap.id).with_error(err));
            }
        }
    }

    tracing::info!(
        grants = out.grants.len(),
        masks = out.masks.len(),
        filters = out.filters.len(),
        shares = out.shares.len(),
        rejected = out.rejected.len(),
        "classified access providers"
    );
    Ok(out)
}

/// Names kept by updates must never be handed out to new roles.
fn reserve_external_ids(ctx: &mut RunContext, access_providers: &[AccessProvider]) {
    for ap in access_providers {
        if ap.kind != AccessProviderKind::Grant || ap.delete {
            continue;
        }
        let Some(external_id) = ap.external_id.as_deref() else {
            continue;
        };
        match RoleId::parse(external_id) {
            Ok(role) => ctx.generator(&role.namespace()).reserve(role.name()),
            Err(err) => {
                tracing::debug!(access_provider = %ap.id, error = %err, "not reserving unparsable external id")
            }
        }
    }
}

async fn classify_grant(
    ctx: &mut RunContext,
    ap: &AccessProvider,
) -> Result<Option<(Action, RoleId)>, SyncError> {
    let previous = ap
        .external_id
        .as_deref()
        .map(RoleId::parse)
        .transpose()?;

    if let Some(previous) = &previous {
        if previous.is_account_role() && is_system_role(previous.name()) {
            return Err(SyncError::invalid(format!(
                "role {} is a system role and cannot be managed",
                previous.name()
            )));
        }
    }

    if ap.delete {
        return Ok(previous.map(|role| (Action::Delete, role)));
    }

    let Some(previous) = previous else {
        let role = naming::generate_role(ctx, ap)?;
        return Ok(Some((Action::Create, role)));
    };

    let expected = naming::expected_base(ctx, ap)?;
    if naming::same_base(ctx, &previous, &expected) {
        return Ok(Some((Action::Update, previous)));
    }

    for _ in 0..MAX_RENAME_ATTEMPTS {
        let candidate = naming::generate_role(ctx, ap)?;
        if !ctx.role_exists(&candidate).await? {
            return Ok(Some((Action::Rename { old: previous }, candidate)));
        }
        tracing::debug!(access_provider = %ap.id, candidate = %candidate, "rename target exists, regenerating");
    }
    Err(SyncError::invalid(format!(
        "no free name found for '{}' after {} attempts",
        ap.hint(),
        MAX_RENAME_ATTEMPTS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apsync_core::SyncConfig;
    use apsync_repository::MemoryRepository;
    use std::sync::Arc;

    fn grant(id: &str, name: &str, external_id: Option<&str>) -> AccessProvider {
        let mut ap = AccessProvider::new(id, name, AccessProviderKind::Grant);
        ap.external_id = external_id.map(str::to_string);
        ap
    }

    fn context(repo: MemoryRepository) -> RunContext {
        RunContext::new(Arc::new(repo), SyncConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_create_update_and_unsupported() {
        let mut ctx = context(MemoryRepository::new());
        let mut purpose = AccessProvider::new("p", "Purpose", AccessProviderKind::Purpose);
        purpose.who.users.push("alice".to_string());

        let out = classify(
            &mut ctx,
            vec![
                grant("a", "Analysts", None),
                grant("b", "Readers", Some("READERS__2")),
                purpose,
            ],
        )
        .await
        .unwrap();

        assert_eq!(out.grants[0].action, Action::Create);
        assert_eq!(out.grants[0].role, Some(RoleId::account("ANALYSTS")));
        assert_eq!(out.grants[1].action, Action::Update);
        assert_eq!(out.grants[1].role, Some(RoleId::account("READERS__2")));
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].access_provider, "p");
        assert!(!out.rejected[0].errors.is_empty());
    }

    #[tokio::test]
    async fn test_kept_names_are_reserved() {
        let mut ctx = context(MemoryRepository::new());

        // The new "AP2" comes first but must not take the name kept by the update.
        let out = classify(
            &mut ctx,
            vec![grant("new", "AP2", None), grant("old", "AP2", Some("AP2"))],
        )
        .await
        .unwrap();

        assert_eq!(out.roles_by_id["new"], RoleId::account("AP2__0"));
        assert_eq!(out.roles_by_id["old"], RoleId::account("AP2"));
    }

    #[tokio::test]
    async fn test_rename_skips_existing_names() {
        let repo = MemoryRepository::new();
        repo.add_role(RoleId::account("NEW_NAME"), "SYSADMIN");
        let mut ctx = context(repo);

        let out = classify(&mut ctx, vec![grant("a", "New name", Some("OLD_NAME"))])
            .await
            .unwrap();

        assert_eq!(
            out.grants[0].action,
            Action::Rename {
                old: RoleId::account("OLD_NAME")
            }
        );
        assert_eq!(out.grants[0].role, Some(RoleId::account("NEW_NAME__0")));
    }

    #[tokio::test]
    async fn test_delete_without_external_id_is_noop() {
        let mut ctx = context(MemoryRepository::new());
        let mut ap = grant("gone", "Gone", None);
        ap.delete = true;

        let out = classify(&mut ctx, vec![ap]).await.unwrap();

        assert!(out.grants.is_empty());
        assert_eq!(out.rejected, vec![AccessProviderFeedback::new("gone")]);
    }

    #[tokio::test]
    async fn test_system_roles_are_rejected() {
        let mut ctx = context(MemoryRepository::new());
        let out = classify(&mut ctx, vec![grant("a", "Admins", Some("ACCOUNTADMIN"))])
            .await
            .unwrap();
        assert!(out.grants.is_empty());
        assert_eq!(out.rejected.len(), 1);
    }
}
