//! Rows returned by warehouse listings.
//!
//! These mirror what the warehouse reports, with as little interpretation as
//! possible. Typed views (e.g. [`GrantOfRole::grantee`]) are provided where the
//! engine needs them.

use apsync_core::{Grant, ObjectKind, RoleId};

/// A native role as listed by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEntity {
    pub name: String,
    pub owner: String,
    pub comment: Option<String>,
}

impl RoleEntity {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            comment: None,
        }
    }
}

/// One holder of a role: `granted_to` is `USER`, `ROLE`, `DATABASE_ROLE`,
/// `APPLICATION_ROLE` or `SHARE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantOfRole {
    pub granted_to: String,
    /// Name of the holder. Database and application roles are reported as
    /// `<namespace>.<role>`.
    pub grantee_name: String,
}

/// Typed holder of a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grantee {
    User(String),
    Role(RoleId),
    Share(String),
    Other { kind: String, name: String },
}

impl GrantOfRole {
    pub fn new(granted_to: impl Into<String>, grantee_name: impl Into<String>) -> Self {
        Self {
            granted_to: granted_to.into(),
            grantee_name: grantee_name.into(),
        }
    }

    pub fn grantee(&self) -> Grantee {
        let name = self.grantee_name.clone();
        match self.granted_to.to_ascii_uppercase().replace(' ', "_").as_str() {
            "USER" => Grantee::User(name),
            "ROLE" => Grantee::Role(RoleId::account(name)),
            "DATABASE_ROLE" => match split_namespaced(&name) {
                Some((database, role)) => Grantee::Role(RoleId::database(database, role)),
                None => Grantee::Other {
                    kind: self.granted_to.clone(),
                    name,
                },
            },
            "APPLICATION_ROLE" => match split_namespaced(&name) {
                Some((application, role)) => Grantee::Role(RoleId::application(application, role)),
                None => Grantee::Other {
                    kind: self.granted_to.clone(),
                    name,
                },
            },
            "SHARE" => Grantee::Share(name),
            _ => Grantee::Other {
                kind: self.granted_to.clone(),
                name,
            },
        }
    }

    /// Row describing `role` as a holder.
    pub fn for_role(role: &RoleId) -> Self {
        let granted_to = match role {
            RoleId::Account { .. } => "ROLE",
            RoleId::Database { .. } => "DATABASE_ROLE",
            RoleId::Application { .. } => "APPLICATION_ROLE",
        };
        Self::new(granted_to, role.qualified_name())
    }
}

fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    let (namespace, role) = name.split_once('.')?;
    if namespace.is_empty() || role.is_empty() {
        return None;
    }
    Some((namespace.trim_matches('"'), role.trim_matches('"')))
}

/// One privilege held by a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantToRole {
    pub privilege: String,
    /// Object type as reported, e.g. `TABLE` or `MATERIALIZED_VIEW`.
    pub granted_on: String,
    /// Dotted object path. Empty for account privileges.
    pub name: String,
}

impl GrantToRole {
    pub fn new(
        privilege: impl Into<String>,
        granted_on: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            privilege: privilege.into(),
            granted_on: granted_on.into(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        ObjectKind::from_granted_on(&self.granted_on)
    }

    pub fn to_grant(&self) -> Grant {
        Grant::new(&self.privilege, self.kind(), self.name.clone())
    }

    pub fn from_grant(grant: &Grant) -> Self {
        Self::new(
            grant.permission.clone(),
            grant.on_type.sql_keyword().replace(' ', "_"),
            grant.on.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseEntity {
    pub name: String,
    /// Set for databases created from an inbound share (`<provider>.<share>`).
    pub origin: Option<String>,
}

impl DatabaseEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: None,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.origin.as_deref().is_some_and(|o| !o.is_empty())
    }
}

/// Share offered to this account by another one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEntity {
    pub name: String,
    pub database_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntity {
    pub name: String,
    pub kind: ObjectKind,
}

impl TableEntity {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnEntity {
    pub name: String,
    pub data_type: String,
}

impl ColumnEntity {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKind {
    Masking,
    RowAccess,
}

impl PolicyKind {
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            PolicyKind::Masking => "MASKING POLICY",
            PolicyKind::RowAccess => "ROW ACCESS POLICY",
        }
    }

    /// Feedback resource type.
    pub fn resource_type(&self) -> &'static str {
        match self {
            PolicyKind::Masking => "maskingPolicy",
            PolicyKind::RowAccess => "rowAccessPolicy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEntity {
    pub name: String,
    pub database: String,
    pub schema: String,
    pub kind: PolicyKind,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDescription {
    pub name: String,
    /// Argument list, e.g. `(VAL VARCHAR)`.
    pub signature: String,
    pub return_type: String,
    pub body: String,
}

/// An object a policy is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyReference {
    pub database: String,
    pub schema: String,
    pub table: String,
    /// Set for masking policies attached to a column.
    pub column: Option<String>,
    pub status: String,
}

impl PolicyReference {
    pub fn table_path(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.table)
    }
}

/// A masking policy to create, with the columns it is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskingPolicy {
    pub database: String,
    pub schema: String,
    pub name: String,
    /// Column data type the policy takes and returns.
    pub data_type: String,
    /// Expression evaluated for the `val` argument.
    pub body: String,
    /// Attached columns as `TABLE.COLUMN` inside the policy's schema.
    pub columns: Vec<String>,
}

impl MaskingPolicy {
    pub fn full_name(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.name)
    }
}

/// A row access policy to create on a single table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowAccessPolicy {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub name: String,
    /// Referenced columns with their data types, in signature order.
    pub arguments: Vec<(String, String)>,
    pub body: String,
}

impl RowAccessPolicy {
    pub fn full_name(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.name)
    }

    pub fn table_path(&self) -> String {
        format!("{}.{}.{}", self.database, self.schema, self.table)
    }
}
