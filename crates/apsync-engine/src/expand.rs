//! What-expansion: from an Access Provider's what items to the grants a role
//! (or share) is expected to hold.
//!
//! - Permissions are checked against the permission catalog; unknown ones are
//!   dropped with a warning.
//! - USAGE is synthesized on every database and schema above a produced
//!   grant, and only then.
//! - A permission on a database or schema that only makes sense on tables or
//!   views is granted on every contained object of a matching kind, plus a
//!   FUTURE grant on the container when enabled.
//! - Anything inside a shared database becomes IMPORTED PRIVILEGES on it.

use apsync_core::{Grant, GrantSet, ObjectKind, WhatItem};

use crate::context::RunContext;
use crate::error::SyncError;

pub const USAGE: &str = "USAGE";
pub const IMPORTED_PRIVILEGES: &str = "IMPORTED PRIVILEGES";
const INFORMATION_SCHEMA: &str = "INFORMATION_SCHEMA";

/// Table-like kinds a container permission may expand to.
const CONTAINED_KINDS: &[ObjectKind] = &[
    ObjectKind::Table,
    ObjectKind::View,
    ObjectKind::MaterializedView,
    ObjectKind::ExternalTable,
    ObjectKind::DynamicTable,
    ObjectKind::IcebergTable,
];

#[derive(Debug, Default)]
pub struct Expansion {
    pub grants: GrantSet,
    pub warnings: Vec<String>,
}

impl Expansion {
    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    fn add_usage(&mut self, database: &str, schema: Option<&str>) {
        self.grants
            .add(Grant::new(USAGE, ObjectKind::Database, database));
        if let Some(schema) = schema {
            self.grants.add(Grant::new(
                USAGE,
                ObjectKind::Schema,
                format!("{}.{}", database, schema),
            ));
        }
    }
}

/// Expected grants for a list of what items.
pub async fn expand_what(ctx: &mut RunContext, what: &[WhatItem]) -> Result<Expansion, SyncError> {
    let mut out = Expansion::default();
    for item in what {
        expand_item(ctx, item, &mut out).await?;
    }
    Ok(out)
}

async fn expand_item(
    ctx: &mut RunContext,
    item: &WhatItem,
    out: &mut Expansion,
) -> Result<(), SyncError> {
    let object = &item.data_object;
    let kind = object.kind();
    let permissions: Vec<String> = item
        .permissions
        .iter()
        .map(|p| p.trim().to_ascii_uppercase())
        .filter(|p| !p.is_empty())
        .collect();

    if permissions.is_empty() {
        return Ok(());
    }

    if object.is_shared() || kind == ObjectKind::SharedDatabase {
        return imported_privileges(object.database(), &object.full_name, out);
    }

    let path = object.path();
    if matches!(kind, ObjectKind::Database | ObjectKind::Schema) || kind.is_table_like() {
        if let Some(database) = path.first() {
            if ctx.is_shared_database(database).await? {
                return imported_privileges(Some(database), &object.full_name, out);
            }
        }
    }

    match kind {
        ObjectKind::Account => {
            for permission in &permissions {
                if ctx.catalog().is_valid(&ObjectKind::Account, permission) {
                    out.grants
                        .add(Grant::new(permission, ObjectKind::Account, ""));
                } else {
                    out.warn(format!(
                        "permission {} is not valid on the account, skipping",
                        permission
                    ));
                }
            }
        }
        ObjectKind::Database => {
            let [database] = path.as_slice() else {
                out.warn(format!("invalid database name '{}'", object.full_name));
                return Ok(());
            };
            for permission in &permissions {
                if ctx.catalog().is_valid(&ObjectKind::Database, permission) {
                    out.grants
                        .add(Grant::new(permission, ObjectKind::Database, *database));
                } else if expands_to_contents(ctx, permission) {
                    expand_container(ctx, database, None, permission, out).await?;
                } else {
                    out.warn(format!(
                        "permission {} is not valid on database {}, skipping",
                        permission, database
                    ));
                }
            }
        }
        ObjectKind::Schema => {
            let [database, schema] = path.as_slice() else {
                out.warn(format!("invalid schema name '{}'", object.full_name));
                return Ok(());
            };
            for permission in &permissions {
                if ctx.catalog().is_valid(&ObjectKind::Schema, permission) {
                    out.grants.add(Grant::new(
                        permission,
                        ObjectKind::Schema,
                        object.full_name.clone(),
                    ));
                    out.add_usage(database, None);
                } else if expands_to_contents(ctx, permission) {
                    expand_container(ctx, database, Some(*schema), permission, out).await?;
                } else {
                    out.warn(format!(
                        "permission {} is not valid on schema {}, skipping",
                        permission, object.full_name
                    ));
                }
            }
        }
        kind if kind.is_table_like() => {
            let [database, schema, _] = path.as_slice() else {
                out.warn(format!("invalid {} name '{}'", kind, object.full_name));
                return Ok(());
            };
            let mut produced = false;
            for permission in &permissions {
                if ctx.catalog().is_valid(&kind, permission) {
                    out.grants.add(Grant::new(
                        permission,
                        kind.clone(),
                        object.full_name.clone(),
                    ));
                    produced = true;
                } else {
                    out.warn(format!(
                        "permission {} is not valid on {} {}, skipping",
                        permission, kind, object.full_name
                    ));
                }
            }
            if produced {
                out.add_usage(database, Some(*schema));
            }
        }
        ObjectKind::Warehouse | ObjectKind::Integration => {
            let exists = match kind {
                ObjectKind::Warehouse => ctx.warehouses().await?,
                _ => ctx.integrations().await?,
            }
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&object.full_name));
            if !exists {
                out.warn(format!(
                    "{} {} does not exist, skipping",
                    kind, object.full_name
                ));
                return Ok(());
            }
            for permission in &permissions {
                if ctx.catalog().is_valid(&kind, permission) {
                    out.grants.add(Grant::new(
                        permission,
                        kind.clone(),
                        object.full_name.clone(),
                    ));
                } else {
                    out.warn(format!(
                        "permission {} is not valid on {} {}, skipping",
                        permission, kind, object.full_name
                    ));
                }
            }
        }
        ObjectKind::Function | ObjectKind::Procedure => {
            let parts: Vec<&str> = object.full_name.splitn(3, '.').collect();
            let [database, schema, signature] = parts.as_slice() else {
                out.warn(format!("invalid {} name '{}'", kind, object.full_name));
                return Ok(());
            };
            let exists = match kind {
                ObjectKind::Function => ctx.functions(database, schema).await?,
                _ => ctx.procedures(database, schema).await?,
            }
            .iter()
            .any(|s| s.eq_ignore_ascii_case(signature));
            if !exists {
                out.warn(format!(
                    "{} {} does not exist, skipping",
                    kind, object.full_name
                ));
                return Ok(());
            }
            let mut produced = false;
            for permission in &permissions {
                if ctx.catalog().is_valid(&kind, permission) {
                    out.grants.add(Grant::new(
                        permission,
                        kind.clone(),
                        object.full_name.clone(),
                    ));
                    produced = true;
                } else {
                    out.warn(format!(
                        "permission {} is not valid on {} {}, skipping",
                        permission, kind, object.full_name
                    ));
                }
            }
            if produced {
                out.add_usage(database, Some(*schema));
            }
        }
        ObjectKind::Column => {
            out.warn(format!(
                "column-level permissions are not supported ({}), skipping",
                object.full_name
            ));
        }
        other => {
            out.warn(format!(
                "unsupported data object type '{}' for {}, skipping",
                other.data_object_type(),
                object.full_name
            ));
        }
    }
    Ok(())
}

fn imported_privileges(
    database: Option<&str>,
    full_name: &str,
    out: &mut Expansion,
) -> Result<(), SyncError> {
    match database.filter(|db| !db.is_empty()) {
        Some(database) => {
            out.grants.add(Grant::new(
                IMPORTED_PRIVILEGES,
                ObjectKind::SharedDatabase,
                database,
            ));
        }
        None => out.warn(format!("invalid shared object name '{}'", full_name)),
    }
    Ok(())
}

fn expands_to_contents(ctx: &RunContext, permission: &str) -> bool {
    CONTAINED_KINDS
        .iter()
        .any(|kind| ctx.catalog().is_valid(kind, permission))
}

/// Grant `permission` on every matching object in a database or schema.
async fn expand_container(
    ctx: &mut RunContext,
    database: &str,
    schema: Option<&str>,
    permission: &str,
    out: &mut Expansion,
) -> Result<(), SyncError> {
    let schemas: Vec<String> = match schema {
        Some(schema) => vec![schema.to_string()],
        None => ctx
            .schemas(database)
            .await?
            .iter()
            .filter(|s| !s.eq_ignore_ascii_case(INFORMATION_SCHEMA))
            .cloned()
            .collect(),
    };

    let mut produced = false;
    for schema in &schemas {
        let tables = ctx.tables(database, schema).await?.to_vec();
        let mut in_schema = false;
        for table in tables {
            if ctx.catalog().is_valid(&table.kind, permission) {
                out.grants.add(Grant::new(
                    permission,
                    table.kind,
                    format!("{}.{}.{}", database, schema, table.name),
                ));
                in_schema = true;
            }
        }
        if in_schema {
            out.add_usage(database, Some(schema));
            produced = true;
        }
    }

    if ctx.config().create_future_grants {
        let container = match schema {
            Some(schema) => format!("{}.{}", database, schema),
            None => database.to_string(),
        };
        for future in [ObjectKind::FutureTables, ObjectKind::FutureViews] {
            if ctx.catalog().is_valid(&future, permission) {
                out.grants
                    .add(Grant::new(permission, future, container.clone()));
                out.add_usage(database, schema);
                produced = true;
            }
        }
    }

    if produced {
        out.add_usage(database, None);
    } else {
        tracing::debug!(database, schema, permission, "container expansion produced no grants");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apsync_core::{DataObjectReference, SyncConfig};
    use apsync_repository::{DatabaseEntity, MemoryRepository, TableEntity};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn item(full_name: &str, object_type: &str, permissions: &[&str]) -> WhatItem {
        WhatItem {
            data_object: DataObjectReference::new(full_name, object_type),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn repo() -> MemoryRepository {
        let repo = MemoryRepository::new();
        repo.add_database(DatabaseEntity::new("DB"));
        repo.add_schema("DB", "S");
        repo.add_schema("DB", "INFORMATION_SCHEMA");
        repo.add_table("DB", "S", TableEntity::new("T", ObjectKind::Table));
        repo.add_table("DB", "S", TableEntity::new("V", ObjectKind::View));
        repo
    }

    fn rendered(expansion: &Expansion) -> Vec<String> {
        expansion.grants.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_table_grant_synthesizes_usage() {
        let mut ctx = RunContext::new(Arc::new(repo()), SyncConfig::default()).unwrap();
        let out = expand_what(&mut ctx, &[item("DB.S.T", "table", &["select"])])
            .await
            .unwrap();
        assert_eq!(
            rendered(&out),
            vec![
                "USAGE ON DATABASE DB",
                "USAGE ON SCHEMA DB.S",
                "SELECT ON TABLE DB.S.T",
            ]
        );
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_permission_dropped_without_usage() {
        let mut ctx = RunContext::new(Arc::new(repo()), SyncConfig::default()).unwrap();
        let out = expand_what(&mut ctx, &[item("DB.S.T", "table", &["FLY"])])
            .await
            .unwrap();
        assert!(out.grants.is_empty());
        assert_eq!(out.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_schema_permission_expands_to_tables_and_futures() {
        let config = SyncConfig {
            create_future_grants: true,
            ..SyncConfig::default()
        };
        let mut ctx = RunContext::new(Arc::new(repo()), config).unwrap();
        let out = expand_what(&mut ctx, &[item("DB.S", "schema", &["SELECT"])])
            .await
            .unwrap();
        assert_eq!(
            rendered(&out),
            vec![
                "USAGE ON DATABASE DB",
                "USAGE ON SCHEMA DB.S",
                "SELECT ON TABLE DB.S.T",
                "SELECT ON VIEW DB.S.V",
                "SELECT ON FUTURE TABLES DB.S",
                "SELECT ON FUTURE VIEWS DB.S",
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_database_maps_to_imported_privileges() {
        let repo = repo();
        repo.add_database(DatabaseEntity {
            name: "SHARED".to_string(),
            origin: Some("PROVIDER.SHARE".to_string()),
        });
        let mut ctx = RunContext::new(Arc::new(repo), SyncConfig::default()).unwrap();
        let out = expand_what(
            &mut ctx,
            &[
                item("SHARED.S.T", "table", &["SELECT"]),
                item("SHARED", "shared-database", &["USAGE"]),
            ],
        )
        .await
        .unwrap();
        assert_eq!(rendered(&out), vec!["IMPORTED PRIVILEGES ON DATABASE SHARED"]);
    }

    #[tokio::test]
    async fn test_account_and_warehouse_grants() {
        let repo = repo();
        repo.add_warehouse("WH");
        let mut ctx = RunContext::new(Arc::new(repo), SyncConfig::default()).unwrap();
        let out = expand_what(
            &mut ctx,
            &[
                item("", "datasource", &["CREATE DATABASE"]),
                item("WH", "warehouse", &["USAGE"]),
                item("MISSING", "warehouse", &["USAGE"]),
            ],
        )
        .await
        .unwrap();
        assert_eq!(
            rendered(&out),
            vec!["CREATE DATABASE ON ACCOUNT", "USAGE ON WAREHOUSE WH"]
        );
        assert_eq!(out.warnings.len(), 1);
    }
}
