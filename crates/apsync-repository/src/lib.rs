//! # apsync-repository
//!
//! The capability contract between the reconciliation engine and a SQL data
//! warehouse. The engine only ever talks to a [`Repository`]; it never builds
//! SQL itself.
//!
//! Two implementations exist:
//! - `apsync-adapter-sql` drives a real warehouse through SQL statements
//! - [`MemoryRepository`] keeps warehouse state in memory and records every
//!   mutating call, for tests and dry runs
//!
//! ## Capability groups
//!
//! | Group | Operations |
//! |-------|------------|
//! | Role lifecycle | create, drop, rename, comment (per namespace) |
//! | Membership | users and roles granted a role |
//! | Grants | grant/revoke on role, on share, grants-to, grants-of, future grants |
//! | Listing | roles, databases, schemas, tables, columns, functions, procedures, warehouses, integrations, shares, applications |
//! | Policies | masking policies, row access policies, describe, references |
//! | Tags | read/write on roles |

pub mod entities;
pub mod error;
pub mod memory;

use std::collections::BTreeMap;

use apsync_core::{Grant, RoleId};
use async_trait::async_trait;

pub use entities::{
    ColumnEntity, DatabaseEntity, GrantOfRole, GrantToRole, Grantee, MaskingPolicy,
    PolicyDescription, PolicyEntity, PolicyKind, PolicyReference, RoleEntity, RowAccessPolicy,
    ShareEntity, TableEntity,
};
pub use error::RepoError;
pub use memory::MemoryRepository;

/// Everything the engine needs from the warehouse.
///
/// Calls are issued one at a time; implementations do not need to support
/// concurrent mutation.
#[async_trait]
pub trait Repository: Send + Sync {
    // =========================================================================
    // Role lifecycle
    // =========================================================================

    async fn create_role(&self, role: &RoleId) -> Result<(), RepoError>;

    /// Drop a role. Fails with [`RepoError::DoesNotExist`] when it is absent.
    async fn drop_role(&self, role: &RoleId) -> Result<(), RepoError>;

    async fn rename_role(&self, old: &RoleId, new: &RoleId) -> Result<(), RepoError>;

    async fn comment_role_if_exists(&self, role: &RoleId, comment: &str) -> Result<(), RepoError>;

    // =========================================================================
    // Membership
    // =========================================================================

    /// Grant a role to users. Implementations batch the statements.
    async fn grant_users_to_role(&self, role: &RoleId, users: &[String]) -> Result<(), RepoError>;

    async fn revoke_users_from_role(&self, role: &RoleId, users: &[String])
    -> Result<(), RepoError>;

    /// Grant `role` to `grantee`.
    async fn grant_role_to_role(&self, role: &RoleId, grantee: &RoleId) -> Result<(), RepoError>;

    async fn revoke_role_from_role(&self, role: &RoleId, grantee: &RoleId)
    -> Result<(), RepoError>;

    /// Who holds the role.
    async fn get_grants_of_role(&self, role: &RoleId) -> Result<Vec<GrantOfRole>, RepoError>;

    // =========================================================================
    // Grants
    // =========================================================================

    async fn execute_grant_on_role(&self, grant: &Grant, role: &RoleId) -> Result<(), RepoError>;

    async fn execute_revoke_on_role(&self, grant: &Grant, role: &RoleId) -> Result<(), RepoError>;

    /// What the role holds.
    async fn get_grants_to_role(&self, role: &RoleId) -> Result<Vec<GrantToRole>, RepoError>;

    /// Future grants held by the role, as `FutureTables`/`FutureViews` grants.
    async fn get_future_grants_to_role(&self, role: &RoleId) -> Result<Vec<Grant>, RepoError>;

    // =========================================================================
    // Listing
    // =========================================================================

    async fn get_account_roles_with_prefix(&self, prefix: &str)
    -> Result<Vec<RoleEntity>, RepoError>;

    async fn get_database_roles(&self, database: &str) -> Result<Vec<RoleEntity>, RepoError>;

    async fn get_applications(&self) -> Result<Vec<String>, RepoError>;

    async fn get_application_roles(&self, application: &str)
    -> Result<Vec<RoleEntity>, RepoError>;

    async fn get_databases(&self) -> Result<Vec<DatabaseEntity>, RepoError>;

    async fn get_inbound_shares(&self) -> Result<Vec<ShareEntity>, RepoError>;

    async fn get_schemas_in_database(&self, database: &str) -> Result<Vec<String>, RepoError>;

    async fn get_tables_in_schema(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableEntity>, RepoError>;

    async fn get_columns_in_table(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnEntity>, RepoError>;

    /// Function signatures, e.g. `MY_FN(VARCHAR)`.
    async fn get_functions_in_schema(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, RepoError>;

    async fn get_procedures_in_schema(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, RepoError>;

    async fn get_warehouses(&self) -> Result<Vec<String>, RepoError>;

    async fn get_integrations(&self) -> Result<Vec<String>, RepoError>;

    async fn get_shares_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RepoError>;

    // =========================================================================
    // Shares
    // =========================================================================

    async fn create_share(&self, name: &str) -> Result<(), RepoError>;

    async fn drop_share(&self, name: &str) -> Result<(), RepoError>;

    async fn set_share_accounts(&self, name: &str, accounts: &[String]) -> Result<(), RepoError>;

    async fn execute_grant_on_share(&self, grant: &Grant, share: &str) -> Result<(), RepoError>;

    async fn execute_revoke_on_share(&self, grant: &Grant, share: &str) -> Result<(), RepoError>;

    // =========================================================================
    // Policies
    // =========================================================================

    /// Create a masking policy and attach it to its columns.
    async fn create_masking_policy(&self, policy: &MaskingPolicy) -> Result<(), RepoError>;

    /// Detach a masking policy from every column and drop it.
    async fn drop_masking_policy(
        &self,
        database: &str,
        schema: &str,
        name: &str,
    ) -> Result<(), RepoError>;

    /// Create a row access policy and make it the table's only one.
    async fn update_filter(&self, policy: &RowAccessPolicy) -> Result<(), RepoError>;

    /// Detach a row access policy from its table and drop it. An empty
    /// `table` drops a policy that is attached nowhere.
    async fn drop_filter(
        &self,
        database: &str,
        schema: &str,
        table: &str,
        name: &str,
    ) -> Result<(), RepoError>;

    async fn describe_policy(
        &self,
        kind: PolicyKind,
        database: &str,
        schema: &str,
        name: &str,
    ) -> Result<PolicyDescription, RepoError>;

    async fn get_policy_references(
        &self,
        database: &str,
        schema: &str,
        name: &str,
    ) -> Result<Vec<PolicyReference>, RepoError>;

    /// All policies of a kind in a database.
    async fn get_policies(
        &self,
        kind: PolicyKind,
        database: &str,
    ) -> Result<Vec<PolicyEntity>, RepoError>;

    /// Policies of a kind in a schema whose name starts with `prefix`.
    async fn get_policies_like(
        &self,
        kind: PolicyKind,
        database: &str,
        schema: &str,
        prefix: &str,
    ) -> Result<Vec<PolicyEntity>, RepoError>;

    // =========================================================================
    // Tags
    // =========================================================================

    async fn get_role_tags(&self, role: &RoleId) -> Result<BTreeMap<String, String>, RepoError>;

    async fn set_role_tags(
        &self,
        role: &RoleId,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), RepoError>;
}
