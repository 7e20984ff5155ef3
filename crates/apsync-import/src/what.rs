//! Folding a role's privilege listing into what items.

use std::collections::HashSet;

use apsync_core::{DataObjectReference, ObjectKind, PermissionCatalog, WhatItem};
use apsync_repository::GrantToRole;

const IMPORTED_PRIVILEGES: &str = "IMPORTED PRIVILEGES";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportedWhat {
    pub items: Vec<WhatItem>,
    /// Some privileges could not be represented.
    pub incomplete: bool,
}

/// Build what items from grants as listed for one role.
///
/// Consecutive grants on the same object share one item. USAGE on databases
/// and schemas is implied by export and left out. Objects inside a shared
/// database collapse into one IMPORTED PRIVILEGES item on that database.
pub fn build_what(
    catalog: &PermissionCatalog,
    shared_databases: &HashSet<String>,
    grants: &[GrantToRole],
) -> ImportedWhat {
    let mut out = ImportedWhat::default();
    let mut shared_seen = HashSet::new();

    for grant in grants {
        let kind = grant.kind();
        let permission = grant.privilege.trim().to_ascii_uppercase();

        if permission == "OWNERSHIP" {
            continue;
        }

        let database = grant.name.split('.').next().unwrap_or_default();
        if shared_databases.contains(database) {
            let imported = kind.is_table_like()
                || (kind == ObjectKind::Database && permission == IMPORTED_PRIVILEGES);
            if imported && shared_seen.insert(database.to_string()) {
                out.items.push(WhatItem {
                    data_object: DataObjectReference::new(
                        database,
                        ObjectKind::SharedDatabase.data_object_type(),
                    ),
                    permissions: vec![IMPORTED_PRIVILEGES.to_string()],
                });
            }
            continue;
        }

        if permission == "USAGE" && matches!(kind, ObjectKind::Database | ObjectKind::Schema) {
            continue;
        }

        if !catalog.supports_kind(&kind) {
            tracing::warn!(object = %grant.name, granted_on = %grant.granted_on, "skipping grant on unsupported object type");
            out.incomplete = true;
            continue;
        }
        if !catalog.is_valid(&kind, &permission) {
            tracing::warn!(object = %grant.name, permission = %permission, "skipping unknown permission");
            out.incomplete = true;
            continue;
        }

        let object_type = kind.data_object_type();
        match out.items.last_mut() {
            Some(last)
                if last.data_object.full_name == grant.name
                    && last.data_object.object_type == object_type =>
            {
                if !last.permissions.contains(&permission) {
                    last.permissions.push(permission);
                }
            }
            _ => out.items.push(WhatItem {
                data_object: DataObjectReference::new(grant.name.clone(), object_type),
                permissions: vec![permission],
            }),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(name: &str, object_type: &str, permissions: &[&str]) -> WhatItem {
        WhatItem {
            data_object: DataObjectReference::new(name, object_type),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_consecutive_grants_coalesce() {
        let catalog = PermissionCatalog::new().unwrap();
        let grants = vec![
            GrantToRole::new("USAGE", "DATABASE", "DB"),
            GrantToRole::new("USAGE", "SCHEMA", "DB.S"),
            GrantToRole::new("SELECT", "TABLE", "DB.S.T"),
            GrantToRole::new("INSERT", "TABLE", "DB.S.T"),
            GrantToRole::new("OWNERSHIP", "TABLE", "DB.S.T"),
            GrantToRole::new("SELECT", "VIEW", "DB.S.V"),
            GrantToRole::new("USAGE", "WAREHOUSE", "WH"),
        ];

        let what = build_what(&catalog, &HashSet::new(), &grants);

        assert!(!what.incomplete);
        assert_eq!(
            what.items,
            vec![
                item("DB.S.T", "table", &["SELECT", "INSERT"]),
                item("DB.S.V", "view", &["SELECT"]),
                item("WH", "warehouse", &["USAGE"]),
            ]
        );
    }

    #[test]
    fn test_unsupported_types_mark_incomplete() {
        let catalog = PermissionCatalog::new().unwrap();
        let grants = vec![
            GrantToRole::new("USAGE", "STREAMLIT", "DB.S.APP"),
            GrantToRole::new("SELECT", "TABLE", "DB.S.T"),
        ];

        let what = build_what(&catalog, &HashSet::new(), &grants);

        assert!(what.incomplete);
        assert_eq!(what.items, vec![item("DB.S.T", "table", &["SELECT"])]);
    }

    #[test]
    fn test_shared_database_synthesized_once() {
        let catalog = PermissionCatalog::new().unwrap();
        let shared: HashSet<String> = ["PARTNER".to_string()].into_iter().collect();
        let grants = vec![
            GrantToRole::new("USAGE", "DATABASE", "PARTNER"),
            GrantToRole::new("SELECT", "TABLE", "PARTNER.PUBLIC.A"),
            GrantToRole::new("SELECT", "TABLE", "PARTNER.PUBLIC.B"),
            GrantToRole::new("SELECT", "TABLE", "DB.S.T"),
        ];

        let what = build_what(&catalog, &shared, &grants);

        assert_eq!(
            what.items,
            vec![
                item("PARTNER", "shared-database", &["IMPORTED PRIVILEGES"]),
                item("DB.S.T", "table", &["SELECT"]),
            ]
        );
    }
}
