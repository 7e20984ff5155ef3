//! Object kinds and the permissions each kind accepts.
//!
//! Grants are only ever issued for permissions listed here. Anything else is
//! dropped with a warning before reaching the warehouse.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when the permission catalog is inconsistent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("object kind {0} has no permissions")]
    EmptyKind(String),

    #[error("permission '{permission}' on {kind} is not a normalized token")]
    InvalidToken { kind: String, permission: String },

    #[error("permission '{permission}' is listed twice for {kind}")]
    DuplicatePermission { kind: String, permission: String },
}

/// Warehouse object kinds the engine knows how to grant on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Account,
    Database,
    SharedDatabase,
    Schema,
    Table,
    View,
    MaterializedView,
    ExternalTable,
    DynamicTable,
    IcebergTable,
    Column,
    Warehouse,
    Integration,
    Function,
    Procedure,
    /// `FUTURE TABLES IN DATABASE|SCHEMA <container>`
    FutureTables,
    /// `FUTURE VIEWS IN DATABASE|SCHEMA <container>`
    FutureViews,
    Other(String),
}

impl ObjectKind {
    /// Parse the type of an Access Provider data object reference.
    pub fn from_data_object_type(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "datasource" | "account" => ObjectKind::Account,
            "database" => ObjectKind::Database,
            "shared-database" => ObjectKind::SharedDatabase,
            "schema" => ObjectKind::Schema,
            "table" => ObjectKind::Table,
            "view" => ObjectKind::View,
            "materialized-view" => ObjectKind::MaterializedView,
            "external-table" => ObjectKind::ExternalTable,
            "dynamic-table" => ObjectKind::DynamicTable,
            "iceberg-table" => ObjectKind::IcebergTable,
            "column" => ObjectKind::Column,
            "warehouse" => ObjectKind::Warehouse,
            "integration" => ObjectKind::Integration,
            "function" => ObjectKind::Function,
            "procedure" => ObjectKind::Procedure,
            other => ObjectKind::Other(other.to_string()),
        }
    }

    /// Parse the `granted_on` column of a warehouse grant listing.
    pub fn from_granted_on(value: &str) -> Self {
        match value.to_ascii_uppercase().replace(' ', "_").as_str() {
            "ACCOUNT" => ObjectKind::Account,
            "DATABASE" => ObjectKind::Database,
            "SCHEMA" => ObjectKind::Schema,
            "TABLE" => ObjectKind::Table,
            "VIEW" => ObjectKind::View,
            "MATERIALIZED_VIEW" => ObjectKind::MaterializedView,
            "EXTERNAL_TABLE" => ObjectKind::ExternalTable,
            "DYNAMIC_TABLE" => ObjectKind::DynamicTable,
            "ICEBERG_TABLE" => ObjectKind::IcebergTable,
            "COLUMN" => ObjectKind::Column,
            "WAREHOUSE" => ObjectKind::Warehouse,
            "INTEGRATION" => ObjectKind::Integration,
            "FUNCTION" => ObjectKind::Function,
            "PROCEDURE" => ObjectKind::Procedure,
            other => ObjectKind::Other(other.to_string()),
        }
    }

    /// Data object type used in Access Provider what items.
    pub fn data_object_type(&self) -> String {
        match self {
            ObjectKind::Account => "datasource".to_string(),
            ObjectKind::Database => "database".to_string(),
            ObjectKind::SharedDatabase => "shared-database".to_string(),
            ObjectKind::Schema => "schema".to_string(),
            ObjectKind::Table => "table".to_string(),
            ObjectKind::View => "view".to_string(),
            ObjectKind::MaterializedView => "materialized-view".to_string(),
            ObjectKind::ExternalTable => "external-table".to_string(),
            ObjectKind::DynamicTable => "dynamic-table".to_string(),
            ObjectKind::IcebergTable => "iceberg-table".to_string(),
            ObjectKind::Column => "column".to_string(),
            ObjectKind::Warehouse => "warehouse".to_string(),
            ObjectKind::Integration => "integration".to_string(),
            ObjectKind::Function => "function".to_string(),
            ObjectKind::Procedure => "procedure".to_string(),
            ObjectKind::FutureTables => "future-tables".to_string(),
            ObjectKind::FutureViews => "future-views".to_string(),
            ObjectKind::Other(other) => other.clone(),
        }
    }

    /// Keyword used in `GRANT ... ON <keyword> <object>`.
    pub fn sql_keyword(&self) -> String {
        match self {
            ObjectKind::Account => "ACCOUNT".to_string(),
            ObjectKind::Database | ObjectKind::SharedDatabase => "DATABASE".to_string(),
            ObjectKind::Schema => "SCHEMA".to_string(),
            ObjectKind::Table => "TABLE".to_string(),
            ObjectKind::View => "VIEW".to_string(),
            ObjectKind::MaterializedView => "MATERIALIZED VIEW".to_string(),
            ObjectKind::ExternalTable => "EXTERNAL TABLE".to_string(),
            ObjectKind::DynamicTable => "DYNAMIC TABLE".to_string(),
            ObjectKind::IcebergTable => "ICEBERG TABLE".to_string(),
            ObjectKind::Column => "COLUMN".to_string(),
            ObjectKind::Warehouse => "WAREHOUSE".to_string(),
            ObjectKind::Integration => "INTEGRATION".to_string(),
            ObjectKind::Function => "FUNCTION".to_string(),
            ObjectKind::Procedure => "PROCEDURE".to_string(),
            ObjectKind::FutureTables => "FUTURE TABLES".to_string(),
            ObjectKind::FutureViews => "FUTURE VIEWS".to_string(),
            ObjectKind::Other(other) => other.to_ascii_uppercase().replace('_', " "),
        }
    }

    /// Iteration rank inside a grant set: ancestors before descendants.
    pub fn rank(&self) -> u8 {
        match self {
            ObjectKind::Database | ObjectKind::SharedDatabase => 0,
            ObjectKind::Schema => 1,
            ObjectKind::Table
            | ObjectKind::View
            | ObjectKind::MaterializedView
            | ObjectKind::ExternalTable
            | ObjectKind::DynamicTable
            | ObjectKind::IcebergTable => 2,
            ObjectKind::Column => 3,
            ObjectKind::Account
            | ObjectKind::Warehouse
            | ObjectKind::Integration
            | ObjectKind::Function
            | ObjectKind::Procedure => 4,
            ObjectKind::FutureTables | ObjectKind::FutureViews => 5,
            ObjectKind::Other(_) => 6,
        }
    }

    /// Tables, views and their variants.
    pub fn is_table_like(&self) -> bool {
        self.rank() == 2
    }

    /// Objects that live inside a schema and need USAGE on their ancestors.
    pub fn is_schema_object(&self) -> bool {
        self.is_table_like()
            || matches!(
                self,
                ObjectKind::Column | ObjectKind::Function | ObjectKind::Procedure
            )
    }

    /// Future-grant kind covering objects of this kind.
    pub fn future_kind(&self) -> Option<ObjectKind> {
        match self {
            ObjectKind::Table => Some(ObjectKind::FutureTables),
            ObjectKind::View => Some(ObjectKind::FutureViews),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_keyword())
    }
}

const ACCOUNT: &[&str] = &[
    "CREATE DATABASE",
    "CREATE ROLE",
    "CREATE USER",
    "CREATE WAREHOUSE",
    "CREATE SHARE",
    "CREATE INTEGRATION",
    "EXECUTE TASK",
    "IMPORT SHARE",
    "MANAGE GRANTS",
    "MONITOR USAGE",
    "MONITOR EXECUTION",
    "APPLY MASKING POLICY",
    "APPLY ROW ACCESS POLICY",
    "APPLY TAG",
];

const DATABASE: &[&str] = &[
    "USAGE",
    "MONITOR",
    "MODIFY",
    "CREATE SCHEMA",
    "CREATE DATABASE ROLE",
    "APPLYBUDGET",
];

const SHARED_DATABASE: &[&str] = &["IMPORTED PRIVILEGES", "REFERENCE_USAGE"];

const SCHEMA: &[&str] = &[
    "USAGE",
    "MONITOR",
    "MODIFY",
    "CREATE TABLE",
    "CREATE VIEW",
    "CREATE MATERIALIZED VIEW",
    "CREATE EXTERNAL TABLE",
    "CREATE DYNAMIC TABLE",
    "CREATE FUNCTION",
    "CREATE PROCEDURE",
    "CREATE STAGE",
    "CREATE FILE FORMAT",
    "CREATE SEQUENCE",
    "CREATE STREAM",
    "CREATE TASK",
    "CREATE MASKING POLICY",
    "CREATE ROW ACCESS POLICY",
    "CREATE TAG",
];

const TABLE: &[&str] = &[
    "SELECT",
    "INSERT",
    "UPDATE",
    "DELETE",
    "TRUNCATE",
    "REFERENCES",
    "REBUILD",
    "EVOLVE SCHEMA",
];

const VIEW: &[&str] = &["SELECT", "REFERENCES"];

const DYNAMIC_TABLE: &[&str] = &["SELECT", "MONITOR", "OPERATE"];

const ICEBERG_TABLE: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "TRUNCATE", "REFERENCES"];

const WAREHOUSE: &[&str] = &["USAGE", "OPERATE", "MODIFY", "MONITOR", "APPLYBUDGET"];

const USAGE_ONLY: &[&str] = &["USAGE"];

/// Fixed mapping from object kind to the permission tokens it accepts.
#[derive(Debug, Clone)]
pub struct PermissionCatalog {
    permissions: HashMap<ObjectKind, &'static [&'static str]>,
}

impl PermissionCatalog {
    /// Build and validate the catalog. Called once at startup.
    pub fn new() -> Result<Self, CatalogError> {
        let permissions = HashMap::from([
            (ObjectKind::Account, ACCOUNT),
            (ObjectKind::Database, DATABASE),
            (ObjectKind::SharedDatabase, SHARED_DATABASE),
            (ObjectKind::Schema, SCHEMA),
            (ObjectKind::Table, TABLE),
            (ObjectKind::View, VIEW),
            (ObjectKind::MaterializedView, VIEW),
            (ObjectKind::ExternalTable, VIEW),
            (ObjectKind::DynamicTable, DYNAMIC_TABLE),
            (ObjectKind::IcebergTable, ICEBERG_TABLE),
            (ObjectKind::Warehouse, WAREHOUSE),
            (ObjectKind::Integration, USAGE_ONLY),
            (ObjectKind::Function, USAGE_ONLY),
            (ObjectKind::Procedure, USAGE_ONLY),
            (ObjectKind::FutureTables, TABLE),
            (ObjectKind::FutureViews, VIEW),
        ]);

        let catalog = Self { permissions };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        for (kind, permissions) in &self.permissions {
            if permissions.is_empty() {
                return Err(CatalogError::EmptyKind(kind.to_string()));
            }

            let mut seen = HashSet::new();
            for permission in permissions.iter() {
                let normalized = permission.trim().to_ascii_uppercase();
                if normalized.is_empty() || normalized != *permission {
                    return Err(CatalogError::InvalidToken {
                        kind: kind.to_string(),
                        permission: permission.to_string(),
                    });
                }
                if !seen.insert(*permission) {
                    return Err(CatalogError::DuplicatePermission {
                        kind: kind.to_string(),
                        permission: permission.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Permissions accepted for a kind, if the kind is grantable at all.
    pub fn permissions(&self, kind: &ObjectKind) -> Option<&'static [&'static str]> {
        self.permissions.get(kind).copied()
    }

    pub fn supports_kind(&self, kind: &ObjectKind) -> bool {
        self.permissions.contains_key(kind)
    }

    /// Whether a permission may be granted on a kind.
    ///
    /// USAGE on databases and schemas is always accepted: the engine
    /// synthesizes it for every ancestor of a produced grant.
    pub fn is_valid(&self, kind: &ObjectKind, permission: &str) -> bool {
        let permission = permission.trim().to_ascii_uppercase();
        if permission == "USAGE" && matches!(kind, ObjectKind::Database | ObjectKind::Schema) {
            return true;
        }
        self.permissions(kind)
            .map(|perms| perms.contains(&permission.as_str()))
            .unwrap_or(false)
    }
}
