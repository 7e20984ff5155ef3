//! Beneficiary predicates for masking and row-access policy bodies.

use std::collections::HashMap;

use apsync_core::{RoleId, WhoItem};

/// SQL predicate for a who item plus any warnings raised building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoClause {
    pub sql: String,
    pub warnings: Vec<String>,
}

/// Resolve an `inheritFrom` entry to a role.
///
/// `ID:<id>` points at another Access Provider of this run; anything else is
/// a native role id.
pub fn resolve_inherited(
    entry: &str,
    roles_by_id: &HashMap<String, RoleId>,
) -> Result<RoleId, String> {
    if let Some(id) = entry.strip_prefix("ID:") {
        return roles_by_id
            .get(id)
            .cloned()
            .ok_or_else(|| format!("access provider {} has no role in this run", id));
    }
    RoleId::parse(entry).map_err(|e| e.to_string())
}

/// Build `current_user() IN (...) OR IS_ROLE_IN_SESSION(...) ...`.
///
/// An empty who item yields `FALSE`: nobody is a beneficiary.
pub fn who_clause(who: &WhoItem, roles_by_id: &HashMap<String, RoleId>) -> WhoClause {
    let mut parts = Vec::new();
    let mut warnings = Vec::new();

    if !who.users.is_empty() {
        let users: Vec<String> = who.users.iter().map(|u| quote(u)).collect();
        parts.push(format!("current_user() IN ({})", users.join(", ")));
    }

    for group in &who.groups {
        warnings.push(format!(
            "group {} cannot be used in a policy body, ignoring it",
            group
        ));
    }

    for entry in &who.inherit_from {
        match resolve_inherited(entry, roles_by_id) {
            Ok(role) => parts.push(role_in_session(&role)),
            Err(err) => warnings.push(format!("skipping inherited role {}: {}", entry, err)),
        }
    }

    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    let sql = match parts.len() {
        0 => "FALSE".to_string(),
        1 => parts.remove(0),
        _ => format!("({})", parts.join(" OR ")),
    };
    WhoClause { sql, warnings }
}

fn role_in_session(role: &RoleId) -> String {
    let function = match role {
        RoleId::Account { .. } => "IS_ROLE_IN_SESSION",
        RoleId::Database { .. } => "IS_DATABASE_ROLE_IN_SESSION",
        RoleId::Application { .. } => "IS_APPLICATION_ROLE_IN_SESSION",
    };
    format!("{}({})", function, quote(&role.qualified_name()))
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn who(users: &[&str], inherit_from: &[&str]) -> WhoItem {
        WhoItem {
            users: users.iter().map(|s| s.to_string()).collect(),
            inherit_from: inherit_from.iter().map(|s| s.to_string()).collect(),
            ..WhoItem::default()
        }
    }

    #[test]
    fn test_empty_who_is_false() {
        let clause = who_clause(&WhoItem::default(), &HashMap::new());
        assert_eq!(clause.sql, "FALSE");
    }

    #[test]
    fn test_users_only() {
        let clause = who_clause(&who(&["alice", "o'neil"], &[]), &HashMap::new());
        assert_eq!(clause.sql, "current_user() IN ('alice', 'o''neil')");
    }

    #[test]
    fn test_users_and_roles() {
        let mut roles = HashMap::new();
        roles.insert("ap-2".to_string(), RoleId::database("DB", "READERS"));
        let clause = who_clause(
            &who(&["alice"], &["ID:ap-2", "ANALYST", "ID:missing"]),
            &roles,
        );
        assert_eq!(
            clause.sql,
            "(current_user() IN ('alice') OR IS_DATABASE_ROLE_IN_SESSION('DB.READERS') OR IS_ROLE_IN_SESSION('ANALYST'))"
        );
        assert_eq!(clause.warnings.len(), 1);
    }
}
