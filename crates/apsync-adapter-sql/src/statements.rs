//! Statement builders.
//!
//! Pure functions from typed requests to SQL text. Identifiers are always
//! double-quoted, literals single-quoted.

use apsync_core::{Grant, ObjectKind, RoleId};
use apsync_repository::{MaskingPolicy, PolicyKind, RepoError, RowAccessPolicy};

pub fn quote_ident(ident: &str) -> Result<String, RepoError> {
    if ident.is_empty() {
        return Err(RepoError::Internal(anyhow::anyhow!("empty identifier")));
    }
    if ident.chars().any(char::is_control) {
        return Err(RepoError::Internal(anyhow::anyhow!(
            "invalid identifier '{}'",
            ident.escape_debug()
        )));
    }
    Ok(format!("\"{}\"", ident.replace('"', "\"\"")))
}

/// Quote every segment of a dotted path. A trailing argument list, as in
/// `DB.S.FN(VARCHAR)`, is kept verbatim.
pub fn quote_path(path: &str) -> Result<String, RepoError> {
    let (names, arguments) = match path.find('(') {
        Some(idx) => path.split_at(idx),
        None => (path, ""),
    };
    let quoted = names
        .split('.')
        .map(|segment| quote_ident(segment.trim_matches('"')))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("{}{}", quoted.join("."), arguments))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// `ROLE "X"`, `DATABASE ROLE "DB"."X"` or `APPLICATION ROLE "APP"."X"`.
pub fn role_target(role: &RoleId) -> Result<String, RepoError> {
    Ok(match role {
        RoleId::Account { name } => format!("ROLE {}", quote_ident(name)?),
        RoleId::Database { database, name } => format!(
            "DATABASE ROLE {}.{}",
            quote_ident(database)?,
            quote_ident(name)?
        ),
        RoleId::Application { application, name } => format!(
            "APPLICATION ROLE {}.{}",
            quote_ident(application)?,
            quote_ident(name)?
        ),
    })
}

// =============================================================================
// Roles
// =============================================================================

pub fn create_role(role: &RoleId) -> Result<String, RepoError> {
    Ok(format!("CREATE {}", role_target(role)?))
}

pub fn drop_role(role: &RoleId) -> Result<String, RepoError> {
    Ok(format!("DROP {}", role_target(role)?))
}

pub fn rename_role(old: &RoleId, new: &RoleId) -> Result<String, RepoError> {
    let new_name = match new {
        RoleId::Account { name } => quote_ident(name)?,
        _ => format!(
            "{}.{}",
            quote_ident(&namespace_of(new))?,
            quote_ident(new.name())?
        ),
    };
    Ok(format!("ALTER {} RENAME TO {}", role_target(old)?, new_name))
}

pub fn comment_role(role: &RoleId, comment: &str) -> Result<String, RepoError> {
    Ok(format!(
        "ALTER {} IF EXISTS SET COMMENT = {}",
        role_target(role)?,
        quote_literal(comment)
    ))
}

fn namespace_of(role: &RoleId) -> String {
    match role {
        RoleId::Account { .. } => String::new(),
        RoleId::Database { database, .. } => database.clone(),
        RoleId::Application { application, .. } => application.clone(),
    }
}

pub fn grant_role_to_user(role: &RoleId, user: &str) -> Result<String, RepoError> {
    Ok(format!("GRANT {} TO USER {}", role_target(role)?, quote_ident(user)?))
}

pub fn revoke_role_from_user(role: &RoleId, user: &str) -> Result<String, RepoError> {
    Ok(format!(
        "REVOKE {} FROM USER {}",
        role_target(role)?,
        quote_ident(user)?
    ))
}

pub fn grant_role_to_role(role: &RoleId, grantee: &RoleId) -> Result<String, RepoError> {
    Ok(format!("GRANT {} TO {}", role_target(role)?, role_target(grantee)?))
}

pub fn revoke_role_from_role(role: &RoleId, grantee: &RoleId) -> Result<String, RepoError> {
    Ok(format!(
        "REVOKE {} FROM {}",
        role_target(role)?,
        role_target(grantee)?
    ))
}

// =============================================================================
// Privileges
// =============================================================================

/// `<PERMISSION> ON <object>` for any grant kind.
pub fn privilege_clause(grant: &Grant) -> Result<String, RepoError> {
    let object = match &grant.on_type {
        ObjectKind::Account => "ACCOUNT".to_string(),
        ObjectKind::FutureTables | ObjectKind::FutureViews => {
            let container = if grant.on.contains('.') {
                "SCHEMA"
            } else {
                "DATABASE"
            };
            format!(
                "{} IN {} {}",
                grant.on_type.sql_keyword(),
                container,
                quote_path(&grant.on)?
            )
        }
        kind => format!("{} {}", kind.sql_keyword(), quote_path(&grant.on)?),
    };
    Ok(format!("{} ON {}", grant.permission, object))
}

pub fn grant_to_role(grant: &Grant, role: &RoleId) -> Result<String, RepoError> {
    Ok(format!(
        "GRANT {} TO {}",
        privilege_clause(grant)?,
        role_target(role)?
    ))
}

pub fn revoke_from_role(grant: &Grant, role: &RoleId) -> Result<String, RepoError> {
    Ok(format!(
        "REVOKE {} FROM {}",
        privilege_clause(grant)?,
        role_target(role)?
    ))
}

pub fn grant_to_share(grant: &Grant, share: &str) -> Result<String, RepoError> {
    Ok(format!(
        "GRANT {} TO SHARE {}",
        privilege_clause(grant)?,
        quote_ident(share)?
    ))
}

pub fn revoke_from_share(grant: &Grant, share: &str) -> Result<String, RepoError> {
    Ok(format!(
        "REVOKE {} FROM SHARE {}",
        privilege_clause(grant)?,
        quote_ident(share)?
    ))
}

// =============================================================================
// Listings
// =============================================================================

pub fn show_grants_of(role: &RoleId) -> Result<String, RepoError> {
    Ok(format!("SHOW GRANTS OF {}", role_target(role)?))
}

pub fn show_grants_to(role: &RoleId) -> Result<String, RepoError> {
    Ok(format!("SHOW GRANTS TO {}", role_target(role)?))
}

pub fn show_future_grants_to(role: &RoleId) -> Result<String, RepoError> {
    Ok(format!("SHOW FUTURE GRANTS TO {}", role_target(role)?))
}

pub fn show_roles_like(prefix: &str) -> String {
    format!("SHOW ROLES LIKE {}", quote_literal(&format!("{}%", prefix)))
}

pub fn show_database_roles(database: &str) -> Result<String, RepoError> {
    Ok(format!("SHOW DATABASE ROLES IN DATABASE {}", quote_ident(database)?))
}

pub fn show_application_roles(application: &str) -> Result<String, RepoError> {
    Ok(format!(
        "SHOW APPLICATION ROLES IN APPLICATION {}",
        quote_ident(application)?
    ))
}

pub fn show_schemas(database: &str) -> Result<String, RepoError> {
    Ok(format!("SHOW SCHEMAS IN DATABASE {}", quote_ident(database)?))
}

pub fn show_objects(database: &str, schema: &str) -> Result<String, RepoError> {
    Ok(format!(
        "SHOW OBJECTS IN SCHEMA {}.{}",
        quote_ident(database)?,
        quote_ident(schema)?
    ))
}

pub fn select_columns(database: &str, schema: &str, table: &str) -> Result<String, RepoError> {
    Ok(format!(
        "SELECT COLUMN_NAME, DATA_TYPE FROM {}.INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {} ORDER BY ORDINAL_POSITION",
        quote_ident(database)?,
        quote_literal(schema),
        quote_literal(table)
    ))
}

pub fn show_functions(database: &str, schema: &str) -> Result<String, RepoError> {
    Ok(format!(
        "SHOW USER FUNCTIONS IN SCHEMA {}.{}",
        quote_ident(database)?,
        quote_ident(schema)?
    ))
}

pub fn show_procedures(database: &str, schema: &str) -> Result<String, RepoError> {
    Ok(format!(
        "SHOW PROCEDURES IN SCHEMA {}.{}",
        quote_ident(database)?,
        quote_ident(schema)?
    ))
}

pub fn show_shares_like(prefix: &str) -> String {
    format!("SHOW SHARES LIKE {}", quote_literal(&format!("{}%", prefix)))
}

// =============================================================================
// Shares
// =============================================================================

pub fn create_share(name: &str) -> Result<String, RepoError> {
    Ok(format!("CREATE SHARE {}", quote_ident(name)?))
}

pub fn drop_share(name: &str) -> Result<String, RepoError> {
    Ok(format!("DROP SHARE {}", quote_ident(name)?))
}

pub fn set_share_accounts(name: &str, accounts: &[String]) -> Result<String, RepoError> {
    Ok(format!(
        "ALTER SHARE {} SET ACCOUNTS = {}",
        quote_ident(name)?,
        accounts.join(", ")
    ))
}

// =============================================================================
// Policies
// =============================================================================

fn policy_path(database: &str, schema: &str, name: &str) -> Result<String, RepoError> {
    Ok(format!(
        "{}.{}.{}",
        quote_ident(database)?,
        quote_ident(schema)?,
        quote_ident(name)?
    ))
}

/// Create the policy, then one statement per attached column.
pub fn create_masking_policy(policy: &MaskingPolicy) -> Result<Vec<String>, RepoError> {
    let path = policy_path(&policy.database, &policy.schema, &policy.name)?;
    let mut statements = vec![format!(
        "CREATE MASKING POLICY {} AS (val {}) RETURNS {} -> {}",
        path, policy.data_type, policy.data_type, policy.body
    )];
    for column in &policy.columns {
        let (table, column) = column.split_once('.').ok_or_else(|| {
            RepoError::Internal(anyhow::anyhow!("column '{}' is not TABLE.COLUMN", column))
        })?;
        statements.push(format!(
            "ALTER TABLE {} MODIFY COLUMN {} SET MASKING POLICY {} FORCE",
            policy_path(&policy.database, &policy.schema, table)?,
            quote_ident(column)?,
            path
        ));
    }
    Ok(statements)
}

pub fn unset_masking_policy(
    database: &str,
    schema: &str,
    table: &str,
    column: &str,
) -> Result<String, RepoError> {
    Ok(format!(
        "ALTER TABLE {} MODIFY COLUMN {} UNSET MASKING POLICY",
        policy_path(database, schema, table)?,
        quote_ident(column)?
    ))
}

pub fn drop_policy(
    kind: PolicyKind,
    database: &str,
    schema: &str,
    name: &str,
) -> Result<String, RepoError> {
    Ok(format!(
        "DROP {} {}",
        kind.sql_keyword(),
        policy_path(database, schema, name)?
    ))
}

/// Create the row access policy, clear the table, then attach it.
pub fn update_filter(policy: &RowAccessPolicy) -> Result<Vec<String>, RepoError> {
    let path = policy_path(&policy.database, &policy.schema, &policy.name)?;
    let table = policy_path(&policy.database, &policy.schema, &policy.table)?;

    let signature = policy
        .arguments
        .iter()
        .map(|(name, data_type)| Ok(format!("{} {}", quote_ident(name)?, data_type)))
        .collect::<Result<Vec<_>, RepoError>>()?;
    let columns = policy
        .arguments
        .iter()
        .map(|(name, _)| quote_ident(name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(vec![
        format!(
            "CREATE ROW ACCESS POLICY {} AS ({}) RETURNS BOOLEAN -> {}",
            path,
            signature.join(", "),
            policy.body
        ),
        format!("ALTER TABLE {} DROP ALL ROW ACCESS POLICIES", table),
        format!(
            "ALTER TABLE {} ADD ROW ACCESS POLICY {} ON ({})",
            table,
            path,
            columns.join(", ")
        ),
    ])
}

pub fn detach_filter(
    database: &str,
    schema: &str,
    table: &str,
    name: &str,
) -> Result<String, RepoError> {
    Ok(format!(
        "ALTER TABLE {} DROP ROW ACCESS POLICY {}",
        policy_path(database, schema, table)?,
        policy_path(database, schema, name)?
    ))
}

pub fn describe_policy(
    kind: PolicyKind,
    database: &str,
    schema: &str,
    name: &str,
) -> Result<String, RepoError> {
    Ok(format!(
        "DESCRIBE {} {}",
        kind.sql_keyword(),
        policy_path(database, schema, name)?
    ))
}

pub fn select_policy_references(
    database: &str,
    schema: &str,
    name: &str,
) -> Result<String, RepoError> {
    Ok(format!(
        "SELECT * FROM TABLE({}.INFORMATION_SCHEMA.POLICY_REFERENCES(POLICY_NAME => {}))",
        quote_ident(database)?,
        quote_literal(&format!("{}.{}.{}", database, schema, name))
    ))
}

pub fn show_policies(kind: PolicyKind, database: &str) -> Result<String, RepoError> {
    Ok(format!(
        "SHOW {} IN DATABASE {}",
        plural(kind),
        quote_ident(database)?
    ))
}

pub fn show_policies_like(
    kind: PolicyKind,
    database: &str,
    schema: &str,
    prefix: &str,
) -> Result<String, RepoError> {
    Ok(format!(
        "SHOW {} LIKE {} IN SCHEMA {}.{}",
        plural(kind),
        quote_literal(&format!("{}%", prefix)),
        quote_ident(database)?,
        quote_ident(schema)?
    ))
}

fn plural(kind: PolicyKind) -> &'static str {
    match kind {
        PolicyKind::Masking => "MASKING POLICIES",
        PolicyKind::RowAccess => "ROW ACCESS POLICIES",
    }
}

// =============================================================================
// Tags
// =============================================================================

pub fn select_role_tags(role: &RoleId) -> String {
    let domain = match role {
        RoleId::Account { .. } => "ROLE",
        RoleId::Database { .. } => "DATABASE ROLE",
        RoleId::Application { .. } => "APPLICATION ROLE",
    };
    let mut sql = format!(
        "SELECT TAG_DATABASE, TAG_SCHEMA, TAG_NAME, TAG_VALUE \
         FROM SNOWFLAKE.ACCOUNT_USAGE.TAG_REFERENCES \
         WHERE DOMAIN = {} AND OBJECT_NAME = {}",
        quote_literal(domain),
        quote_literal(role.name())
    );
    if !role.is_account_role() {
        sql.push_str(&format!(
            " AND OBJECT_DATABASE = {}",
            quote_literal(&namespace_of(role))
        ));
    }
    sql
}

pub fn set_role_tags<'a>(
    role: &RoleId,
    tags: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Result<Option<String>, RepoError> {
    let assignments = tags
        .into_iter()
        .map(|(tag, value)| Ok(format!("{} = {}", quote_path(tag)?, quote_literal(value))))
        .collect::<Result<Vec<_>, RepoError>>()?;
    if assignments.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!(
        "ALTER {} SET TAG {}",
        role_target(role)?,
        assignments.join(", ")
    )))
}
