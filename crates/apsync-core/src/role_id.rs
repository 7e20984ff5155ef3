//! Namespaced role identifiers.
//!
//! The warehouse knows three role namespaces: account roles, roles scoped to a
//! database and roles scoped to an application. Internally a role is always a
//! [`RoleId`]; the string envelope below only exists at the boundary (feedback
//! external ids and imported Access Providers):
//!
//! ```text
//! ACCOUNT_ROLE
//! DATABASEROLE###DATABASE:<db>###ROLE:<role>
//! APPLICATIONROLE###APPLICATION:<app>###ROLE:<role>
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const SEPARATOR: &str = "###";
const DATABASE_ROLE_TAG: &str = "DATABASEROLE";
const APPLICATION_ROLE_TAG: &str = "APPLICATIONROLE";
const DATABASE_PREFIX: &str = "DATABASE:";
const APPLICATION_PREFIX: &str = "APPLICATION:";
const ROLE_PREFIX: &str = "ROLE:";

/// Errors raised while parsing a namespaced role id.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoleIdError {
    #[error("role id is empty")]
    Empty,

    #[error("malformed database role id '{0}'")]
    MalformedDatabaseRole(String),

    #[error("malformed application role id '{0}'")]
    MalformedApplicationRole(String),

    #[error("account role name '{0}' must not contain '###'")]
    InvalidAccountRole(String),
}

/// The namespace a role lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleNamespace {
    Account,
    Database(String),
    Application(String),
}

impl fmt::Display for RoleNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleNamespace::Account => write!(f, "account"),
            RoleNamespace::Database(db) => write!(f, "database {}", db),
            RoleNamespace::Application(app) => write!(f, "application {}", app),
        }
    }
}

/// A role in one of the three warehouse namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleId {
    Account { name: String },
    Database { database: String, name: String },
    Application { application: String, name: String },
}

impl RoleId {
    pub fn account(name: impl Into<String>) -> Self {
        RoleId::Account { name: name.into() }
    }

    pub fn database(database: impl Into<String>, name: impl Into<String>) -> Self {
        RoleId::Database {
            database: database.into(),
            name: name.into(),
        }
    }

    pub fn application(application: impl Into<String>, name: impl Into<String>) -> Self {
        RoleId::Application {
            application: application.into(),
            name: name.into(),
        }
    }

    /// Build a role id for a local name inside the given namespace.
    pub fn in_namespace(namespace: &RoleNamespace, name: impl Into<String>) -> Self {
        match namespace {
            RoleNamespace::Account => RoleId::account(name),
            RoleNamespace::Database(db) => RoleId::database(db.clone(), name),
            RoleNamespace::Application(app) => RoleId::application(app.clone(), name),
        }
    }

    /// The local role name, without namespace.
    pub fn name(&self) -> &str {
        match self {
            RoleId::Account { name }
            | RoleId::Database { name, .. }
            | RoleId::Application { name, .. } => name,
        }
    }

    pub fn namespace(&self) -> RoleNamespace {
        match self {
            RoleId::Account { .. } => RoleNamespace::Account,
            RoleId::Database { database, .. } => RoleNamespace::Database(database.clone()),
            RoleId::Application { application, .. } => {
                RoleNamespace::Application(application.clone())
            }
        }
    }

    /// Same namespace, different local name.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        RoleId::in_namespace(&self.namespace(), name)
    }

    pub fn is_account_role(&self) -> bool {
        matches!(self, RoleId::Account { .. })
    }

    /// Dotted name used inside SQL statements, e.g. `DB.ROLE` for database roles.
    pub fn qualified_name(&self) -> String {
        match self {
            RoleId::Account { name } => name.clone(),
            RoleId::Database { database, name } => format!("{}.{}", database, name),
            RoleId::Application { application, name } => format!("{}.{}", application, name),
        }
    }

    /// Feedback type reported for roles of this namespace.
    pub fn resource_type(&self) -> &'static str {
        match self {
            RoleId::Account { .. } => "role",
            RoleId::Database { .. } => "databaseRole",
            RoleId::Application { .. } => "applicationRole",
        }
    }

    /// Serialize into the boundary envelope.
    pub fn external_id(&self) -> String {
        match self {
            RoleId::Account { name } => name.clone(),
            RoleId::Database { database, name } => format!(
                "{DATABASE_ROLE_TAG}{SEPARATOR}{DATABASE_PREFIX}{database}{SEPARATOR}{ROLE_PREFIX}{name}"
            ),
            RoleId::Application { application, name } => format!(
                "{APPLICATION_ROLE_TAG}{SEPARATOR}{APPLICATION_PREFIX}{application}{SEPARATOR}{ROLE_PREFIX}{name}"
            ),
        }
    }

    /// Parse the boundary envelope back into a role id.
    pub fn parse(external_id: &str) -> Result<Self, RoleIdError> {
        if external_id.is_empty() {
            return Err(RoleIdError::Empty);
        }

        if let Some(rest) = strip_tag(external_id, DATABASE_ROLE_TAG) {
            return parse_envelope(rest, DATABASE_PREFIX)
                .map(|(database, name)| RoleId::Database { database, name })
                .ok_or_else(|| RoleIdError::MalformedDatabaseRole(external_id.to_string()));
        }

        if let Some(rest) = strip_tag(external_id, APPLICATION_ROLE_TAG) {
            return parse_envelope(rest, APPLICATION_PREFIX)
                .map(|(application, name)| RoleId::Application { application, name })
                .ok_or_else(|| RoleIdError::MalformedApplicationRole(external_id.to_string()));
        }

        if external_id.contains(SEPARATOR) {
            return Err(RoleIdError::InvalidAccountRole(external_id.to_string()));
        }

        Ok(RoleId::account(external_id))
    }

    /// True when the string claims to be a database role id (well-formed or not).
    pub fn looks_like_database_role(external_id: &str) -> bool {
        strip_tag(external_id, DATABASE_ROLE_TAG).is_some()
    }

    /// True when the string claims to be an application role id (well-formed or not).
    pub fn looks_like_application_role(external_id: &str) -> bool {
        strip_tag(external_id, APPLICATION_ROLE_TAG).is_some()
    }
}

fn strip_tag<'a>(value: &'a str, tag: &str) -> Option<&'a str> {
    value.strip_prefix(tag)?.strip_prefix(SEPARATOR)
}

fn parse_envelope(rest: &str, scope_prefix: &str) -> Option<(String, String)> {
    let (scope, role) = rest.split_once(SEPARATOR)?;
    let scope = scope.strip_prefix(scope_prefix)?;
    let role = role.strip_prefix(ROLE_PREFIX)?;

    if scope.is_empty() || role.is_empty() || role.contains(SEPARATOR) {
        return None;
    }

    Some((scope.to_string(), role.to_string()))
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.external_id())
    }
}

impl FromStr for RoleId {
    type Err = RoleIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoleId::parse(s)
    }
}
