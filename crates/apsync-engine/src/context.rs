//! Per-run state.
//!
//! A [`RunContext`] is created at the start of a run and dropped at its end.
//! Warehouse listings are loaded lazily on first use and never invalidated;
//! the only state that changes during a run is the live set of existing role
//! names, which the appliers update as they create, rename and drop roles.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use apsync_core::{
    NamingConstraints, PermissionCatalog, RoleId, RoleNamespace, SyncConfig, UniqueNameGenerator,
};
use apsync_repository::{ColumnEntity, DatabaseEntity, Repository, ShareEntity, TableEntity};
use regex::Regex;

use crate::error::SyncError;

type SchemaKey = (String, String);
type TableKey = (String, String, String);

pub struct RunContext {
    repo: Arc<dyn Repository>,
    config: SyncConfig,
    catalog: PermissionCatalog,
    ignore_linked_roles: Vec<Regex>,

    generators: HashMap<RoleNamespace, UniqueNameGenerator>,
    existing_roles: HashMap<RoleNamespace, HashSet<String>>,

    databases: Option<Vec<DatabaseEntity>>,
    inbound_shares: Option<Vec<ShareEntity>>,
    warehouses: Option<Vec<String>>,
    integrations: Option<Vec<String>>,
    schemas: HashMap<String, Vec<String>>,
    tables: HashMap<SchemaKey, Vec<TableEntity>>,
    columns: HashMap<TableKey, Vec<ColumnEntity>>,
    functions: HashMap<SchemaKey, Vec<String>>,
    procedures: HashMap<SchemaKey, Vec<String>>,
}

impl RunContext {
    /// Validate the configuration and set up an empty context.
    pub fn new(repo: Arc<dyn Repository>, config: SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let ignore_linked_roles = config.ignore_linked_role_patterns()?;
        let catalog = PermissionCatalog::new()?;

        Ok(Self {
            repo,
            config,
            catalog,
            ignore_linked_roles,
            generators: HashMap::new(),
            existing_roles: HashMap::new(),
            databases: None,
            inbound_shares: None,
            warehouses: None,
            integrations: None,
            schemas: HashMap::new(),
            tables: HashMap::new(),
            columns: HashMap::new(),
            functions: HashMap::new(),
            procedures: HashMap::new(),
        })
    }

    pub fn repo(&self) -> &dyn Repository {
        self.repo.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub fn naming(&self) -> &NamingConstraints {
        &self.config.naming
    }

    /// Whether an inherited role must be left alone.
    pub fn is_ignored_linked_role(&self, role: &RoleId) -> bool {
        let name = role.name();
        let qualified = role.qualified_name();
        self.ignore_linked_roles
            .iter()
            .any(|re| re.is_match(name) || re.is_match(&qualified))
    }

    // =========================================================================
    // Naming
    // =========================================================================

    pub fn generator(&mut self, namespace: &RoleNamespace) -> &mut UniqueNameGenerator {
        let constraints = &self.config.naming;
        self.generators
            .entry(namespace.clone())
            .or_insert_with(|| UniqueNameGenerator::new(constraints.clone()))
    }

    // =========================================================================
    // Existing roles
    // =========================================================================

    async fn load_roles(&mut self, namespace: &RoleNamespace) -> Result<(), SyncError> {
        if self.existing_roles.contains_key(namespace) {
            return Ok(());
        }
        let listed = match namespace {
            // The role prefix scopes import only. Exports must see every
            // account role so an existing one is adopted, not recreated.
            RoleNamespace::Account => self.repo.get_account_roles_with_prefix("").await,
            RoleNamespace::Database(database) => self.repo.get_database_roles(database).await,
            RoleNamespace::Application(application) => {
                self.repo.get_application_roles(application).await
            }
        }
        .map_err(|source| SyncError::Infrastructure {
            what: format!("roles in {}", namespace),
            source,
        })?;

        tracing::debug!(namespace = %namespace, roles = listed.len(), "loaded existing roles");
        self.existing_roles.insert(
            namespace.clone(),
            listed.into_iter().map(|r| r.name).collect(),
        );
        Ok(())
    }

    /// Whether a role exists, as far as this run knows.
    pub async fn role_exists(&mut self, role: &RoleId) -> Result<bool, SyncError> {
        let namespace = role.namespace();
        self.load_roles(&namespace).await?;
        Ok(self
            .existing_roles
            .get(&namespace)
            .is_some_and(|names| names.contains(role.name())))
    }

    pub fn mark_created(&mut self, role: &RoleId) {
        self.existing_roles
            .entry(role.namespace())
            .or_default()
            .insert(role.name().to_string());
    }

    pub fn mark_dropped(&mut self, role: &RoleId) {
        if let Some(names) = self.existing_roles.get_mut(&role.namespace()) {
            names.remove(role.name());
        }
    }

    // =========================================================================
    // Object listings
    // =========================================================================

    pub async fn databases(&mut self) -> Result<&[DatabaseEntity], SyncError> {
        if self.databases.is_none() {
            self.databases = Some(self.repo.get_databases().await?);
        }
        Ok(self.databases.as_deref().unwrap_or_default())
    }

    /// Whether a database was created from an inbound share.
    pub async fn is_shared_database(&mut self, database: &str) -> Result<bool, SyncError> {
        if self
            .databases()
            .await?
            .iter()
            .any(|d| d.name == database && d.is_shared())
        {
            return Ok(true);
        }
        Ok(self
            .inbound_shares()
            .await?
            .iter()
            .any(|s| s.database_name.as_deref() == Some(database)))
    }

    pub async fn inbound_shares(&mut self) -> Result<&[ShareEntity], SyncError> {
        if self.inbound_shares.is_none() {
            self.inbound_shares = Some(self.repo.get_inbound_shares().await?);
        }
        Ok(self.inbound_shares.as_deref().unwrap_or_default())
    }

    pub async fn warehouses(&mut self) -> Result<&[String], SyncError> {
        if self.warehouses.is_none() {
            self.warehouses = Some(self.repo.get_warehouses().await?);
        }
        Ok(self.warehouses.as_deref().unwrap_or_default())
    }

    pub async fn integrations(&mut self) -> Result<&[String], SyncError> {
        if self.integrations.is_none() {
            self.integrations = Some(self.repo.get_integrations().await?);
        }
        Ok(self.integrations.as_deref().unwrap_or_default())
    }

    pub async fn schemas(&mut self, database: &str) -> Result<&[String], SyncError> {
        if !self.schemas.contains_key(database) {
            let schemas = self.repo.get_schemas_in_database(database).await?;
            self.schemas.insert(database.to_string(), schemas);
        }
        Ok(self
            .schemas
            .get(database)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    pub async fn tables(&mut self, database: &str, schema: &str) -> Result<&[TableEntity], SyncError> {
        let key = (database.to_string(), schema.to_string());
        if !self.tables.contains_key(&key) {
            let tables = self.repo.get_tables_in_schema(database, schema).await?;
            self.tables.insert(key.clone(), tables);
        }
        Ok(self.tables.get(&key).map(Vec::as_slice).unwrap_or_default())
    }

    pub async fn columns(
        &mut self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<&[ColumnEntity], SyncError> {
        let key = (database.to_string(), schema.to_string(), table.to_string());
        if !self.columns.contains_key(&key) {
            let columns = self
                .repo
                .get_columns_in_table(database, schema, table)
                .await?;
            self.columns.insert(key.clone(), columns);
        }
        Ok(self.columns.get(&key).map(Vec::as_slice).unwrap_or_default())
    }

    pub async fn functions(&mut self, database: &str, schema: &str) -> Result<&[String], SyncError> {
        let key = (database.to_string(), schema.to_string());
        if !self.functions.contains_key(&key) {
            let functions = self.repo.get_functions_in_schema(database, schema).await?;
            self.functions.insert(key.clone(), functions);
        }
        Ok(self.functions.get(&key).map(Vec::as_slice).unwrap_or_default())
    }

    pub async fn procedures(&mut self, database: &str, schema: &str) -> Result<&[String], SyncError> {
        let key = (database.to_string(), schema.to_string());
        if !self.procedures.contains_key(&key) {
            let procedures = self.repo.get_procedures_in_schema(database, schema).await?;
            self.procedures.insert(key.clone(), procedures);
        }
        Ok(self
            .procedures
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }
}
