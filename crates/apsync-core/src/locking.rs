//! Rules deciding which warehouse roles may be managed.
//!
//! Both directions rely on these: import marks such roles as not
//! internalizable, export never touches them.

use crate::role_id::RoleId;

/// Built-in account roles owned by the warehouse itself.
pub const SYSTEM_ROLES: &[&str] = &[
    "ORGADMIN",
    "ACCOUNTADMIN",
    "SECURITYADMIN",
    "USERADMIN",
    "SYSADMIN",
    "PUBLIC",
];

/// Reason recorded on locks set because of an excluded owner.
pub const EXCLUDED_OWNER_REASON: &str =
    "This role is owned by an excluded owner and is managed outside of apsync";

/// Whether a role, given by its boundary external id, must never be
/// internalized.
///
/// System roles are always locked. Anything that claims to be a database or
/// application role but does not parse is locked as well.
pub fn is_not_internalizable(external_id: &str) -> bool {
    match RoleId::parse(external_id) {
        Ok(RoleId::Account { name }) => is_system_role(&name),
        Ok(_) => false,
        Err(err) => {
            tracing::warn!(role = external_id, error = %err, "treating unparsable role as not internalizable");
            true
        }
    }
}

pub fn is_system_role(name: &str) -> bool {
    SYSTEM_ROLES.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// Exact match against an exclusion list of namespaced role ids.
pub fn is_excluded(role: &RoleId, excluded: &[String]) -> bool {
    let external_id = role.external_id();
    excluded.iter().any(|e| e == &external_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_roles_locked() {
        assert!(is_not_internalizable("ORGADMIN"));
        assert!(is_not_internalizable("accountadmin"));
        assert!(!is_not_internalizable("DATA_ANALYST"));
    }

    #[test]
    fn test_database_roles() {
        assert!(!is_not_internalizable("DATABASEROLE###DATABASE:SALES###ROLE:READER"));
        assert!(is_not_internalizable("DATABASEROLE###SALES###READER"));
        assert!(is_not_internalizable("APPLICATIONROLE###APP###ROLE:X"));
    }

    #[test]
    fn test_exclusion_is_exact() {
        let excluded = vec!["DATABASEROLE###DATABASE:SALES###ROLE:READER".to_string()];
        assert!(is_excluded(&RoleId::database("SALES", "READER"), &excluded));
        assert!(!is_excluded(&RoleId::account("READER"), &excluded));
    }
}
