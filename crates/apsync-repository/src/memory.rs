//! In-memory warehouse.
//!
//! Keeps roles, grants, objects and policies in memory and records every
//! mutating call as a statement-like line (`CREATE ROLE AP1`,
//! `GRANT SELECT ON TABLE DB.S.T TO ROLE AP1`, ...). Failures can be injected
//! per operation and target with [`MemoryRepository::fail_on`].

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use apsync_core::{Grant, ObjectKind, RoleId};
use async_trait::async_trait;

use crate::entities::{
    ColumnEntity, DatabaseEntity, GrantOfRole, GrantToRole, MaskingPolicy, PolicyDescription,
    PolicyEntity, PolicyKind, PolicyReference, RoleEntity, RowAccessPolicy, ShareEntity,
    TableEntity,
};
use crate::error::RepoError;
use crate::Repository;

/// Owner reported for objects created through the repository.
pub const DEFAULT_OWNER: &str = "SYSADMIN";

#[derive(Debug, Default)]
struct RoleState {
    owner: String,
    comment: Option<String>,
    grants: Vec<GrantToRole>,
    future_grants: Vec<Grant>,
    holders: Vec<GrantOfRole>,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct ShareState {
    accounts: Vec<String>,
    grants: Vec<Grant>,
}

#[derive(Debug, Default)]
struct State {
    roles: BTreeMap<RoleId, RoleState>,
    applications: Vec<String>,
    databases: Vec<DatabaseEntity>,
    inbound_shares: Vec<ShareEntity>,
    schemas: BTreeMap<String, Vec<String>>,
    tables: BTreeMap<(String, String), Vec<TableEntity>>,
    columns: BTreeMap<(String, String, String), Vec<ColumnEntity>>,
    functions: BTreeMap<(String, String), Vec<String>>,
    procedures: BTreeMap<(String, String), Vec<String>>,
    warehouses: Vec<String>,
    integrations: Vec<String>,
    shares: BTreeMap<String, ShareState>,
    masking_policies: BTreeMap<String, MaskingPolicy>,
    row_access_policies: BTreeMap<String, RowAccessPolicy>,
    failures: HashSet<String>,
    calls: Vec<String>,
}

impl State {
    fn check_failure(&self, operation: &str, target: &str) -> Result<(), RepoError> {
        if self.failures.contains(&failure_key(operation, target)) {
            return Err(RepoError::Statement {
                statement: format!("{} {}", operation, target),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn role(&self, role: &RoleId) -> Result<&RoleState, RepoError> {
        self.roles
            .get(role)
            .ok_or_else(|| RepoError::does_not_exist(role_ref(role)))
    }

    fn role_mut(&mut self, role: &RoleId) -> Result<&mut RoleState, RepoError> {
        self.roles
            .get_mut(role)
            .ok_or_else(|| RepoError::does_not_exist(role_ref(role)))
    }

    fn share_mut(&mut self, name: &str) -> Result<&mut ShareState, RepoError> {
        self.shares
            .get_mut(name)
            .ok_or_else(|| RepoError::does_not_exist(format!("SHARE {}", name)))
    }
}

fn failure_key(operation: &str, target: &str) -> String {
    format!("{}:{}", operation, target)
}

/// `ROLE X`, `DATABASE ROLE DB.X` or `APPLICATION ROLE APP.X`.
pub fn role_ref(role: &RoleId) -> String {
    match role {
        RoleId::Account { .. } => format!("ROLE {}", role.qualified_name()),
        RoleId::Database { .. } => format!("DATABASE ROLE {}", role.qualified_name()),
        RoleId::Application { .. } => format!("APPLICATION ROLE {}", role.qualified_name()),
    }
}

/// Repository backed by in-memory state.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, RepoError> {
        self.state
            .read()
            .map_err(|e| RepoError::Internal(anyhow::anyhow!("state lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, RepoError> {
        self.state
            .write()
            .map_err(|e| RepoError::Internal(anyhow::anyhow!("state lock poisoned: {}", e)))
    }

    fn seed(&self, f: impl FnOnce(&mut State)) {
        if let Ok(mut state) = self.state.write() {
            f(&mut state);
        }
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub fn add_role(&self, role: RoleId, owner: &str) {
        self.seed(|s| {
            s.roles.entry(role).or_default().owner = owner.to_string();
        });
    }

    pub fn add_role_grant(&self, role: &RoleId, grant: GrantToRole) {
        self.seed(|s| s.roles.entry(role.clone()).or_default().grants.push(grant));
    }

    pub fn add_future_grant(&self, role: &RoleId, grant: Grant) {
        self.seed(|s| {
            s.roles
                .entry(role.clone())
                .or_default()
                .future_grants
                .push(grant)
        });
    }

    pub fn add_role_holder(&self, role: &RoleId, holder: GrantOfRole) {
        self.seed(|s| s.roles.entry(role.clone()).or_default().holders.push(holder));
    }

    pub fn add_role_tag(&self, role: &RoleId, tag: &str, value: &str) {
        self.seed(|s| {
            s.roles
                .entry(role.clone())
                .or_default()
                .tags
                .insert(tag.to_string(), value.to_string());
        });
    }

    pub fn add_database(&self, database: DatabaseEntity) {
        self.seed(|s| s.databases.push(database));
    }

    pub fn add_inbound_share(&self, share: ShareEntity) {
        self.seed(|s| s.inbound_shares.push(share));
    }

    pub fn add_application(&self, application: &str) {
        self.seed(|s| s.applications.push(application.to_string()));
    }

    pub fn add_schema(&self, database: &str, schema: &str) {
        self.seed(|s| {
            s.schemas
                .entry(database.to_string())
                .or_default()
                .push(schema.to_string())
        });
    }

    pub fn add_table(&self, database: &str, schema: &str, table: TableEntity) {
        self.seed(|s| {
            s.tables
                .entry((database.to_string(), schema.to_string()))
                .or_default()
                .push(table)
        });
    }

    pub fn add_column(&self, database: &str, schema: &str, table: &str, column: ColumnEntity) {
        self.seed(|s| {
            s.columns
                .entry((database.to_string(), schema.to_string(), table.to_string()))
                .or_default()
                .push(column)
        });
    }

    pub fn add_function(&self, database: &str, schema: &str, signature: &str) {
        self.seed(|s| {
            s.functions
                .entry((database.to_string(), schema.to_string()))
                .or_default()
                .push(signature.to_string())
        });
    }

    pub fn add_procedure(&self, database: &str, schema: &str, signature: &str) {
        self.seed(|s| {
            s.procedures
                .entry((database.to_string(), schema.to_string()))
                .or_default()
                .push(signature.to_string())
        });
    }

    pub fn add_warehouse(&self, warehouse: &str) {
        self.seed(|s| s.warehouses.push(warehouse.to_string()));
    }

    pub fn add_integration(&self, integration: &str) {
        self.seed(|s| s.integrations.push(integration.to_string()));
    }

    pub fn add_share(&self, name: &str) {
        self.seed(|s| {
            s.shares.entry(name.to_string()).or_default();
        });
    }

    pub fn add_masking_policy(&self, policy: MaskingPolicy) {
        self.seed(|s| {
            s.masking_policies.insert(policy.full_name(), policy);
        });
    }

    pub fn add_row_access_policy(&self, policy: RowAccessPolicy) {
        self.seed(|s| {
            s.row_access_policies.insert(policy.full_name(), policy);
        });
    }

    /// Make `operation` (a trait method name) fail for `target`.
    ///
    /// Targets are role external ids for role operations, names for shares
    /// and full names for policies.
    pub fn fail_on(&self, operation: &str, target: &str) {
        self.seed(|s| {
            s.failures.insert(failure_key(operation, target));
        });
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every mutating call so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.read().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        self.seed(|s| s.calls.clear());
    }

    pub fn has_role(&self, role: &RoleId) -> bool {
        self.read().is_ok_and(|s| s.roles.contains_key(role))
    }

    pub fn role_grants(&self, role: &RoleId) -> Vec<Grant> {
        self.read()
            .ok()
            .and_then(|s| {
                s.roles
                    .get(role)
                    .map(|r| r.grants.iter().map(GrantToRole::to_grant).collect())
            })
            .unwrap_or_default()
    }

    pub fn role_comment(&self, role: &RoleId) -> Option<String> {
        self.read()
            .ok()
            .and_then(|s| s.roles.get(role).and_then(|r| r.comment.clone()))
    }

    pub fn has_share(&self, name: &str) -> bool {
        self.read().is_ok_and(|s| s.shares.contains_key(name))
    }

    pub fn share_names(&self) -> Vec<String> {
        self.read()
            .map(|s| s.shares.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn share_accounts(&self, name: &str) -> Vec<String> {
        self.read()
            .ok()
            .and_then(|s| s.shares.get(name).map(|sh| sh.accounts.clone()))
            .unwrap_or_default()
    }

    pub fn masking_policy(&self, full_name: &str) -> Option<MaskingPolicy> {
        self.read()
            .ok()
            .and_then(|s| s.masking_policies.get(full_name).cloned())
    }

    pub fn masking_policy_names(&self) -> Vec<String> {
        self.read()
            .map(|s| s.masking_policies.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_access_policy(&self, full_name: &str) -> Option<RowAccessPolicy> {
        self.read()
            .ok()
            .and_then(|s| s.row_access_policies.get(full_name).cloned())
    }

    pub fn row_access_policy_names(&self) -> Vec<String> {
        self.read()
            .map(|s| s.row_access_policies.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn roles_in(state: &State, filter: impl Fn(&RoleId) -> bool) -> Vec<RoleEntity> {
    state
        .roles
        .iter()
        .filter(|(id, _)| filter(id))
        .map(|(id, role)| RoleEntity {
            name: id.name().to_string(),
            owner: role.owner.clone(),
            comment: role.comment.clone(),
        })
        .collect()
}

fn policy_entity(kind: PolicyKind, database: &str, schema: &str, name: &str) -> PolicyEntity {
    PolicyEntity {
        name: name.to_string(),
        database: database.to_string(),
        schema: schema.to_string(),
        kind,
        owner: DEFAULT_OWNER.to_string(),
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_role(&self, role: &RoleId) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("create_role", &role.external_id())?;
        if state.roles.contains_key(role) {
            return Err(RepoError::already_exists(role_ref(role)));
        }
        state.roles.insert(
            role.clone(),
            RoleState {
                owner: DEFAULT_OWNER.to_string(),
                ..RoleState::default()
            },
        );
        state.calls.push(format!("CREATE {}", role_ref(role)));
        Ok(())
    }

    async fn drop_role(&self, role: &RoleId) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("drop_role", &role.external_id())?;
        if state.roles.remove(role).is_none() {
            return Err(RepoError::does_not_exist(role_ref(role)));
        }
        for other in state.roles.values_mut() {
            other.holders.retain(|h| h != &GrantOfRole::for_role(role));
        }
        state.calls.push(format!("DROP {}", role_ref(role)));
        Ok(())
    }

    async fn rename_role(&self, old: &RoleId, new: &RoleId) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("rename_role", &old.external_id())?;
        if state.roles.contains_key(new) {
            return Err(RepoError::already_exists(role_ref(new)));
        }
        let role = state
            .roles
            .remove(old)
            .ok_or_else(|| RepoError::does_not_exist(role_ref(old)))?;
        state.roles.insert(new.clone(), role);
        state
            .calls
            .push(format!("RENAME {} TO {}", role_ref(old), new.name()));
        Ok(())
    }

    async fn comment_role_if_exists(&self, role: &RoleId, comment: &str) -> Result<(), RepoError> {
        let mut state = self.write()?;
        if let Some(existing) = state.roles.get_mut(role) {
            existing.comment = Some(comment.to_string());
            state.calls.push(format!("COMMENT ON {}", role_ref(role)));
        }
        Ok(())
    }

    async fn grant_users_to_role(&self, role: &RoleId, users: &[String]) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("grant_users_to_role", &role.external_id())?;
        let target = role_ref(role);
        let existing = state.role_mut(role)?;
        let mut calls = Vec::new();
        for user in users {
            let holder = GrantOfRole::new("USER", user.clone());
            if !existing.holders.contains(&holder) {
                existing.holders.push(holder);
            }
            calls.push(format!("GRANT {} TO USER {}", target, user));
        }
        state.calls.extend(calls);
        Ok(())
    }

    async fn revoke_users_from_role(
        &self,
        role: &RoleId,
        users: &[String],
    ) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("revoke_users_from_role", &role.external_id())?;
        let target = role_ref(role);
        let existing = state.role_mut(role)?;
        let mut calls = Vec::new();
        for user in users {
            existing
                .holders
                .retain(|h| !(h.granted_to == "USER" && &h.grantee_name == user));
            calls.push(format!("REVOKE {} FROM USER {}", target, user));
        }
        state.calls.extend(calls);
        Ok(())
    }

    async fn grant_role_to_role(&self, role: &RoleId, grantee: &RoleId) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("grant_role_to_role", &role.external_id())?;
        state.role(grantee)?;
        let holder = GrantOfRole::for_role(grantee);
        let existing = state.role_mut(role)?;
        if !existing.holders.contains(&holder) {
            existing.holders.push(holder);
        }
        state
            .calls
            .push(format!("GRANT {} TO {}", role_ref(role), role_ref(grantee)));
        Ok(())
    }

    async fn revoke_role_from_role(
        &self,
        role: &RoleId,
        grantee: &RoleId,
    ) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("revoke_role_from_role", &role.external_id())?;
        let holder = GrantOfRole::for_role(grantee);
        state.role_mut(role)?.holders.retain(|h| h != &holder);
        state
            .calls
            .push(format!("REVOKE {} FROM {}", role_ref(role), role_ref(grantee)));
        Ok(())
    }

    async fn get_grants_of_role(&self, role: &RoleId) -> Result<Vec<GrantOfRole>, RepoError> {
        Ok(self.read()?.role(role)?.holders.clone())
    }

    async fn execute_grant_on_role(&self, grant: &Grant, role: &RoleId) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("execute_grant_on_role", &role.external_id())?;
        let existing = state.role_mut(role)?;
        if matches!(grant.on_type, ObjectKind::FutureTables | ObjectKind::FutureViews) {
            if !existing.future_grants.contains(grant) {
                existing.future_grants.push(grant.clone());
            }
        } else {
            let row = GrantToRole::from_grant(grant);
            if !existing.grants.contains(&row) {
                existing.grants.push(row);
            }
        }
        state
            .calls
            .push(format!("GRANT {} TO {}", grant, role_ref(role)));
        Ok(())
    }

    async fn execute_revoke_on_role(&self, grant: &Grant, role: &RoleId) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("execute_revoke_on_role", &role.external_id())?;
        let existing = state.role_mut(role)?;
        existing.future_grants.retain(|g| g != grant);
        existing.grants.retain(|g| &g.to_grant() != grant);
        state
            .calls
            .push(format!("REVOKE {} FROM {}", grant, role_ref(role)));
        Ok(())
    }

    async fn get_grants_to_role(&self, role: &RoleId) -> Result<Vec<GrantToRole>, RepoError> {
        Ok(self.read()?.role(role)?.grants.clone())
    }

    async fn get_future_grants_to_role(&self, role: &RoleId) -> Result<Vec<Grant>, RepoError> {
        Ok(self.read()?.role(role)?.future_grants.clone())
    }

    async fn get_account_roles_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<RoleEntity>, RepoError> {
        let state = self.read()?;
        Ok(roles_in(&state, |id| {
            id.is_account_role() && id.name().starts_with(prefix)
        }))
    }

    async fn get_database_roles(&self, database: &str) -> Result<Vec<RoleEntity>, RepoError> {
        let state = self.read()?;
        Ok(roles_in(&state, |id| {
            matches!(id, RoleId::Database { database: db, .. } if db == database)
        }))
    }

    async fn get_applications(&self) -> Result<Vec<String>, RepoError> {
        Ok(self.read()?.applications.clone())
    }

    async fn get_application_roles(
        &self,
        application: &str,
    ) -> Result<Vec<RoleEntity>, RepoError> {
        let state = self.read()?;
        Ok(roles_in(&state, |id| {
            matches!(id, RoleId::Application { application: app, .. } if app == application)
        }))
    }

    async fn get_databases(&self) -> Result<Vec<DatabaseEntity>, RepoError> {
        Ok(self.read()?.databases.clone())
    }

    async fn get_inbound_shares(&self) -> Result<Vec<ShareEntity>, RepoError> {
        Ok(self.read()?.inbound_shares.clone())
    }

    async fn get_schemas_in_database(&self, database: &str) -> Result<Vec<String>, RepoError> {
        Ok(self
            .read()?
            .schemas
            .get(database)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_tables_in_schema(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableEntity>, RepoError> {
        Ok(self
            .read()?
            .tables
            .get(&(database.to_string(), schema.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_columns_in_table(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnEntity>, RepoError> {
        Ok(self
            .read()?
            .columns
            .get(&(database.to_string(), schema.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_functions_in_schema(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, RepoError> {
        Ok(self
            .read()?
            .functions
            .get(&(database.to_string(), schema.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_procedures_in_schema(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, RepoError> {
        Ok(self
            .read()?
            .procedures
            .get(&(database.to_string(), schema.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_warehouses(&self) -> Result<Vec<String>, RepoError> {
        Ok(self.read()?.warehouses.clone())
    }

    async fn get_integrations(&self) -> Result<Vec<String>, RepoError> {
        Ok(self.read()?.integrations.clone())
    }

    async fn get_shares_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RepoError> {
        Ok(self
            .read()?
            .shares
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_share(&self, name: &str) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("create_share", name)?;
        if state.shares.contains_key(name) {
            return Err(RepoError::already_exists(format!("SHARE {}", name)));
        }
        state.shares.insert(name.to_string(), ShareState::default());
        state.calls.push(format!("CREATE SHARE {}", name));
        Ok(())
    }

    async fn drop_share(&self, name: &str) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("drop_share", name)?;
        if state.shares.remove(name).is_none() {
            return Err(RepoError::does_not_exist(format!("SHARE {}", name)));
        }
        state.calls.push(format!("DROP SHARE {}", name));
        Ok(())
    }

    async fn set_share_accounts(&self, name: &str, accounts: &[String]) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("set_share_accounts", name)?;
        state.share_mut(name)?.accounts = accounts.to_vec();
        state.calls.push(format!(
            "ALTER SHARE {} SET ACCOUNTS = {}",
            name,
            accounts.join(", ")
        ));
        Ok(())
    }

    async fn execute_grant_on_share(&self, grant: &Grant, share: &str) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("execute_grant_on_share", share)?;
        let existing = state.share_mut(share)?;
        if !existing.grants.contains(grant) {
            existing.grants.push(grant.clone());
        }
        state
            .calls
            .push(format!("GRANT {} TO SHARE {}", grant, share));
        Ok(())
    }

    async fn execute_revoke_on_share(&self, grant: &Grant, share: &str) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("execute_revoke_on_share", share)?;
        state.share_mut(share)?.grants.retain(|g| g != grant);
        state
            .calls
            .push(format!("REVOKE {} FROM SHARE {}", grant, share));
        Ok(())
    }

    async fn create_masking_policy(&self, policy: &MaskingPolicy) -> Result<(), RepoError> {
        let mut state = self.write()?;
        let full_name = policy.full_name();
        state.check_failure("create_masking_policy", &full_name)?;
        if state.masking_policies.contains_key(&full_name) {
            return Err(RepoError::already_exists(format!(
                "MASKING POLICY {}",
                full_name
            )));
        }
        state.masking_policies.insert(full_name.clone(), policy.clone());
        state.calls.push(format!("CREATE MASKING POLICY {}", full_name));
        for column in &policy.columns {
            state.calls.push(format!(
                "SET MASKING POLICY {} ON {}.{}.{}",
                full_name, policy.database, policy.schema, column
            ));
        }
        Ok(())
    }

    async fn drop_masking_policy(
        &self,
        database: &str,
        schema: &str,
        name: &str,
    ) -> Result<(), RepoError> {
        let mut state = self.write()?;
        let full_name = format!("{}.{}.{}", database, schema, name);
        state.check_failure("drop_masking_policy", &full_name)?;
        if state.masking_policies.remove(&full_name).is_none() {
            return Err(RepoError::does_not_exist(format!(
                "MASKING POLICY {}",
                full_name
            )));
        }
        state.calls.push(format!("DROP MASKING POLICY {}", full_name));
        Ok(())
    }

    async fn update_filter(&self, policy: &RowAccessPolicy) -> Result<(), RepoError> {
        let mut state = self.write()?;
        let full_name = policy.full_name();
        let table = policy.table_path();
        state.check_failure("update_filter", &table)?;
        let previous: Vec<String> = state
            .row_access_policies
            .iter()
            .filter(|(_, p)| p.table_path() == table)
            .map(|(name, _)| name.clone())
            .collect();
        for name in previous {
            state.row_access_policies.remove(&name);
            state.calls.push(format!("DROP ROW ACCESS POLICY {} FROM {}", name, table));
        }
        state
            .row_access_policies
            .insert(full_name.clone(), policy.clone());
        state
            .calls
            .push(format!("CREATE ROW ACCESS POLICY {} ON {}", full_name, table));
        Ok(())
    }

    async fn drop_filter(
        &self,
        database: &str,
        schema: &str,
        table: &str,
        name: &str,
    ) -> Result<(), RepoError> {
        let mut state = self.write()?;
        let full_name = format!("{}.{}.{}", database, schema, name);
        state.check_failure("drop_filter", &full_name)?;
        if state.row_access_policies.remove(&full_name).is_none() {
            return Err(RepoError::does_not_exist(format!(
                "ROW ACCESS POLICY {}",
                full_name
            )));
        }
        state.calls.push(format!(
            "DROP ROW ACCESS POLICY {} FROM {}.{}.{}",
            full_name, database, schema, table
        ));
        Ok(())
    }

    async fn describe_policy(
        &self,
        kind: PolicyKind,
        database: &str,
        schema: &str,
        name: &str,
    ) -> Result<PolicyDescription, RepoError> {
        let state = self.read()?;
        let full_name = format!("{}.{}.{}", database, schema, name);
        let description = match kind {
            PolicyKind::Masking => state
                .masking_policies
                .get(&full_name)
                .map(|p| PolicyDescription {
                    name: p.name.clone(),
                    signature: format!("(VAL {})", p.data_type),
                    return_type: p.data_type.clone(),
                    body: p.body.clone(),
                }),
            PolicyKind::RowAccess => state.row_access_policies.get(&full_name).map(|p| {
                let arguments: Vec<String> = p
                    .arguments
                    .iter()
                    .map(|(name, data_type)| format!("{} {}", name, data_type))
                    .collect();
                PolicyDescription {
                    name: p.name.clone(),
                    signature: format!("({})", arguments.join(", ")),
                    return_type: "BOOLEAN".to_string(),
                    body: p.body.clone(),
                }
            }),
        };
        description
            .ok_or_else(|| RepoError::does_not_exist(format!("{} {}", kind.sql_keyword(), full_name)))
    }

    async fn get_policy_references(
        &self,
        database: &str,
        schema: &str,
        name: &str,
    ) -> Result<Vec<PolicyReference>, RepoError> {
        let state = self.read()?;
        let full_name = format!("{}.{}.{}", database, schema, name);
        if let Some(policy) = state.masking_policies.get(&full_name) {
            return Ok(policy
                .columns
                .iter()
                .filter_map(|c| c.split_once('.'))
                .map(|(table, column)| PolicyReference {
                    database: policy.database.clone(),
                    schema: policy.schema.clone(),
                    table: table.to_string(),
                    column: Some(column.to_string()),
                    status: "ACTIVE".to_string(),
                })
                .collect());
        }
        if let Some(policy) = state.row_access_policies.get(&full_name) {
            return Ok(vec![PolicyReference {
                database: policy.database.clone(),
                schema: policy.schema.clone(),
                table: policy.table.clone(),
                column: None,
                status: "ACTIVE".to_string(),
            }]);
        }
        Err(RepoError::does_not_exist(format!("POLICY {}", full_name)))
    }

    async fn get_policies(
        &self,
        kind: PolicyKind,
        database: &str,
    ) -> Result<Vec<PolicyEntity>, RepoError> {
        let state = self.read()?;
        let policies = match kind {
            PolicyKind::Masking => state
                .masking_policies
                .values()
                .filter(|p| p.database == database)
                .map(|p| policy_entity(kind, &p.database, &p.schema, &p.name))
                .collect(),
            PolicyKind::RowAccess => state
                .row_access_policies
                .values()
                .filter(|p| p.database == database)
                .map(|p| policy_entity(kind, &p.database, &p.schema, &p.name))
                .collect(),
        };
        Ok(policies)
    }

    async fn get_policies_like(
        &self,
        kind: PolicyKind,
        database: &str,
        schema: &str,
        prefix: &str,
    ) -> Result<Vec<PolicyEntity>, RepoError> {
        Ok(self
            .get_policies(kind, database)
            .await?
            .into_iter()
            .filter(|p| p.schema == schema && p.name.starts_with(prefix))
            .collect())
    }

    async fn get_role_tags(&self, role: &RoleId) -> Result<BTreeMap<String, String>, RepoError> {
        Ok(self.read()?.role(role)?.tags.clone())
    }

    async fn set_role_tags(
        &self,
        role: &RoleId,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), RepoError> {
        let mut state = self.write()?;
        state.check_failure("set_role_tags", &role.external_id())?;
        let target = role_ref(role);
        let existing = state.role_mut(role)?;
        let mut calls = Vec::new();
        for (tag, value) in tags {
            existing.tags.insert(tag.clone(), value.clone());
            calls.push(format!("SET TAG {} = '{}' ON {}", tag, value, target));
        }
        state.calls.extend(calls);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_role_lifecycle_is_recorded() {
        let repo = MemoryRepository::new();
        let role = RoleId::account("AP1");
        repo.create_role(&role).await.unwrap();
        repo.execute_grant_on_role(&Grant::new("usage", ObjectKind::Database, "DB"), &role)
            .await
            .unwrap();
        repo.grant_users_to_role(&role, &["alice".to_string()])
            .await
            .unwrap();

        assert_eq!(
            repo.calls(),
            vec![
                "CREATE ROLE AP1",
                "GRANT USAGE ON DATABASE DB TO ROLE AP1",
                "GRANT ROLE AP1 TO USER alice",
            ]
        );
        assert_eq!(
            repo.get_grants_of_role(&role).await.unwrap(),
            vec![GrantOfRole::new("USER", "alice")]
        );
    }

    #[tokio::test]
    async fn test_drop_missing_role_is_does_not_exist() {
        let repo = MemoryRepository::new();
        let err = repo.drop_role(&RoleId::account("GHOST")).await.unwrap_err();
        assert!(err.is_does_not_exist());
    }

    #[tokio::test]
    async fn test_rename_keeps_grants() {
        let repo = MemoryRepository::new();
        let old = RoleId::database("DB", "OLD");
        let new = RoleId::database("DB", "NEW");
        repo.add_role(old.clone(), "SYSADMIN");
        repo.add_role_grant(&old, GrantToRole::new("SELECT", "TABLE", "DB.S.T"));

        repo.rename_role(&old, &new).await.unwrap();

        assert!(!repo.has_role(&old));
        assert_eq!(
            repo.role_grants(&new),
            vec![Grant::new("SELECT", ObjectKind::Table, "DB.S.T")]
        );
        assert_eq!(repo.calls(), vec!["RENAME DATABASE ROLE DB.OLD TO NEW"]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let repo = MemoryRepository::new();
        repo.fail_on("create_role", "AP1");
        assert!(matches!(
            repo.create_role(&RoleId::account("AP1")).await,
            Err(RepoError::Statement { .. })
        ));
        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_filter_replaces_table_policy() {
        let repo = MemoryRepository::new();
        let policy = |name: &str| RowAccessPolicy {
            database: "DB".to_string(),
            schema: "S".to_string(),
            table: "T".to_string(),
            name: name.to_string(),
            arguments: vec![("STATE".to_string(), "VARCHAR".to_string())],
            body: "TRUE".to_string(),
        };
        repo.update_filter(&policy("F1")).await.unwrap();
        repo.update_filter(&policy("F2")).await.unwrap();

        assert_eq!(repo.row_access_policy_names(), vec!["DB.S.F2"]);
        let references = repo.get_policy_references("DB", "S", "F2").await.unwrap();
        assert_eq!(references[0].table_path(), "DB.S.T");
    }
}
