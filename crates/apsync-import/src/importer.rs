//! Source importer: warehouse roles and policies to Access Providers.

use std::collections::HashSet;
use std::sync::Arc;

use apsync_core::locking::{self, EXCLUDED_OWNER_REASON};
use apsync_core::{
    AccessProviderKind, ExternalAccessProvider, Owner, PermissionCatalog, RoleId, RoleScope,
    SyncConfig,
};
use apsync_repository::{Grantee, PolicyKind, Repository, RoleEntity};

use crate::error::ImportError;
use crate::policies::import_policies;
use crate::what::build_what;

pub struct SourceImporter {
    repo: Arc<dyn Repository>,
    config: SyncConfig,
    catalog: PermissionCatalog,
}

impl SourceImporter {
    pub fn new(repo: Arc<dyn Repository>, config: SyncConfig) -> Result<Self, ImportError> {
        config.validate()?;
        let catalog = PermissionCatalog::new()?;
        Ok(Self {
            repo,
            config,
            catalog,
        })
    }

    /// Read every managed role and policy.
    ///
    /// Account roles come first, then database roles per database, then
    /// application roles per application, then masking and row access
    /// policies.
    pub async fn import(&self) -> Result<Vec<ExternalAccessProvider>, ImportError> {
        let databases = self.repo.get_databases().await?;
        let shared: HashSet<String> = databases
            .iter()
            .filter(|d| d.origin.is_some())
            .map(|d| d.name.clone())
            .collect();
        let local: Vec<&str> = databases
            .iter()
            .filter(|d| d.origin.is_none() && !self.config.is_database_excluded(&d.name))
            .map(|d| d.name.as_str())
            .collect();

        let mut out = Vec::new();

        let account_roles = self
            .repo
            .get_account_roles_with_prefix(&self.config.role_prefix)
            .await?;
        tracing::info!(roles = account_roles.len(), "importing account roles");
        for role in account_roles {
            let id = RoleId::account(role.name.clone());
            out.extend(self.import_role(id, &role, &shared).await?);
        }

        if self.config.import_database_roles {
            for database in &local {
                let roles = self.repo.get_database_roles(database).await?;
                tracing::info!(database = %database, roles = roles.len(), "importing database roles");
                for role in roles {
                    let id = RoleId::database(*database, role.name.clone());
                    out.extend(self.import_role(id, &role, &shared).await?);
                }
            }
        }

        if self.config.import_application_roles {
            for application in self.repo.get_applications().await? {
                let roles = self.repo.get_application_roles(&application).await?;
                tracing::info!(application = %application, roles = roles.len(), "importing application roles");
                for role in roles {
                    let id = RoleId::application(application.clone(), role.name.clone());
                    out.extend(self.import_role(id, &role, &shared).await?);
                }
            }
        }

        for database in &local {
            if self.config.import_masks {
                out.extend(
                    import_policies(
                        self.repo.as_ref(),
                        PolicyKind::Masking,
                        database,
                        &self.config.mask_prefix,
                    )
                    .await?,
                );
            }
            if self.config.import_filters {
                out.extend(
                    import_policies(
                        self.repo.as_ref(),
                        PolicyKind::RowAccess,
                        database,
                        &self.config.filter_prefix,
                    )
                    .await?,
                );
            }
        }

        tracing::info!(access_providers = out.len(), "import finished");
        Ok(out)
    }

    async fn import_role(
        &self,
        id: RoleId,
        entity: &RoleEntity,
        shared: &HashSet<String>,
    ) -> Result<Option<ExternalAccessProvider>, ImportError> {
        let external_id = id.external_id();
        if locking::is_excluded(&id, &self.config.excluded_roles) {
            tracing::debug!(role = %external_id, "skipping excluded role");
            return Ok(None);
        }

        let holders = match self.repo.get_grants_of_role(&id).await {
            Ok(holders) => holders,
            Err(err) if err.is_does_not_exist() => {
                tracing::warn!(role = %external_id, "role vanished while importing");
                return Ok(None);
            }
            Err(err) => return Err(ImportError::read(&external_id, err)),
        };
        let grants = self
            .repo
            .get_grants_to_role(&id)
            .await
            .map_err(|err| ImportError::read(&external_id, err))?;

        let mut ap =
            ExternalAccessProvider::new(&external_id, id.qualified_name(), AccessProviderKind::Grant);
        ap.naming_hint = self.naming_hint(&id);
        ap.resource_type = Some(id.resource_type().to_string());
        ap.role_scope = Some(match &id {
            RoleId::Account { .. } => RoleScope::AccountRole,
            RoleId::Database { .. } => RoleScope::DatabaseRole,
            RoleId::Application { .. } => RoleScope::ApplicationRole,
        });

        for holder in &holders {
            match holder.grantee() {
                Grantee::User(user) => ap.who.users.push(user),
                Grantee::Role(role) => ap.who.inherit_from.push(role.external_id()),
                _ => {}
            }
        }

        let what = build_what(&self.catalog, shared, &grants);
        ap.what = what.items;
        ap.incomplete = what.incomplete;

        if locking::is_not_internalizable(&external_id) {
            ap.not_internalizable = true;
        } else if self.config.is_owner_excluded(&entity.owner) {
            if self.config.link_to_external_identity_store_groups {
                ap.lock_partially(EXCLUDED_OWNER_REASON);
            } else {
                ap.not_internalizable = true;
            }
        }

        if self.config.tags.is_configured() {
            ap.owners = self.read_owner(&id).await?;
        }

        tracing::debug!(role = %external_id, users = ap.who.users.len(), what = ap.what.len(), "imported role");
        Ok(Some(ap))
    }

    /// The hint an export turns back into this role's name: the name
    /// without its uniqueness suffix, qualified by its namespace.
    fn naming_hint(&self, id: &RoleId) -> String {
        let base = self.config.naming.strip_suffix(id.name());
        match id {
            RoleId::Account { .. } => base.to_string(),
            RoleId::Database { database, .. } => format!("{}.{}", database, base),
            RoleId::Application { application, .. } => format!("{}.{}", application, base),
        }
    }

    async fn read_owner(&self, id: &RoleId) -> Result<Vec<Owner>, ImportError> {
        let tags = self
            .repo
            .get_role_tags(id)
            .await
            .map_err(|err| ImportError::read(id.external_id(), err))?;
        let lookup = |tag: &Option<String>| tag.as_ref().and_then(|t| tags.get(t)).cloned();

        let owner = Owner {
            email: lookup(&self.config.tags.owner_email),
            account_name: lookup(&self.config.tags.owner_name),
            group_name: lookup(&self.config.tags.owner_group),
        };
        if owner.email.is_none() && owner.account_name.is_none() && owner.group_name.is_none() {
            return Ok(Vec::new());
        }
        Ok(vec![owner])
    }
}
