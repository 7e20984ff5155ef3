//! Role names for grant Access Providers.
//!
//! The namespace comes from the Access Provider's role scope. Database and
//! application role hints may carry their namespace as `<namespace>.<local>`;
//! otherwise it is taken from the previous external id or, for database
//! roles, from the first what item.

use apsync_core::{AccessProvider, RoleId, RoleNamespace, RoleScope};
use rand::Rng;

use crate::context::RunContext;
use crate::error::SyncError;

/// Namespace and local hint of the role an Access Provider maps to.
pub fn namespace_and_hint(ap: &AccessProvider) -> Result<(RoleNamespace, String), SyncError> {
    let hint = ap.hint().trim();
    let previous = ap
        .external_id
        .as_deref()
        .and_then(|id| RoleId::parse(id).ok());

    match ap.scope() {
        RoleScope::AccountRole => Ok((RoleNamespace::Account, hint.to_string())),
        RoleScope::DatabaseRole => {
            if let Some((database, local)) = split_hint(hint) {
                return Ok((RoleNamespace::Database(database.to_string()), local.to_string()));
            }
            if let Some(RoleId::Database { database, .. }) = previous {
                return Ok((RoleNamespace::Database(database), hint.to_string()));
            }
            let database = ap
                .what
                .iter()
                .find_map(|w| w.data_object.database())
                .filter(|db| !db.is_empty())
                .ok_or_else(|| {
                    SyncError::invalid(format!(
                        "cannot determine the database of database role '{}'",
                        hint
                    ))
                })?;
            Ok((RoleNamespace::Database(database.to_string()), hint.to_string()))
        }
        RoleScope::ApplicationRole => {
            if let Some((application, local)) = split_hint(hint) {
                return Ok((
                    RoleNamespace::Application(application.to_string()),
                    local.to_string(),
                ));
            }
            if let Some(RoleId::Application { application, .. }) = previous {
                return Ok((RoleNamespace::Application(application), hint.to_string()));
            }
            Err(SyncError::invalid(format!(
                "cannot determine the application of application role '{}'",
                hint
            )))
        }
    }
}

fn split_hint(hint: &str) -> Option<(&str, &str)> {
    let (namespace, local) = hint.split_once('.')?;
    let (namespace, local) = (namespace.trim(), local.trim());
    if namespace.is_empty() || local.is_empty() {
        return None;
    }
    Some((namespace, local))
}

/// The role an Access Provider would get if its name had to be generated
/// right now, without consuming a name.
pub fn expected_base(ctx: &RunContext, ap: &AccessProvider) -> Result<RoleId, SyncError> {
    let (namespace, hint) = namespace_and_hint(ap)?;
    let base = ctx.naming().translate(&hint)?;
    Ok(RoleId::in_namespace(&namespace, base))
}

/// Generate and claim a fresh role name for an Access Provider.
pub fn generate_role(ctx: &mut RunContext, ap: &AccessProvider) -> Result<RoleId, SyncError> {
    let (namespace, hint) = namespace_and_hint(ap)?;
    let name = ctx.generator(&namespace).generate(&hint)?;
    Ok(RoleId::in_namespace(&namespace, name))
}

/// Whether `existing` is `expected` up to a uniqueness suffix.
pub fn same_base(ctx: &RunContext, existing: &RoleId, expected: &RoleId) -> bool {
    existing.namespace() == expected.namespace()
        && ctx.naming().strip_suffix(existing.name()) == ctx.naming().strip_suffix(expected.name())
}

const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of the random segment in policy and share names.
pub const RANDOM_SUFFIX_LEN: usize = 8;

pub fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..RANDOM_SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// Stem `<prefix><translated hint>_` and a fresh base `<stem><random>` for
/// policy and share names.
pub fn object_names(ctx: &RunContext, prefix: &str, hint: &str) -> Result<(String, String), SyncError> {
    let stem = format!("{}{}_", prefix, ctx.naming().translate(hint)?);
    let base = format!("{}{}", stem, random_suffix());
    Ok((stem, base))
}

/// Whether `name` is `<stem><random>` optionally followed by `_<anything>`.
///
/// Used to recognize objects generated for the same Access Provider name
/// without matching longer names that merely share the stem.
pub fn is_generated_from(stem: &str, name: &str) -> bool {
    let Some(rest) = name.strip_prefix(stem) else {
        return false;
    };
    let segment = rest.split('_').next().unwrap_or_default();
    segment.len() == RANDOM_SUFFIX_LEN
        && segment
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apsync_core::{AccessProviderKind, DataObjectReference, WhatItem};

    fn ap(name: &str, scope: RoleScope) -> AccessProvider {
        let mut ap = AccessProvider::new("id", name, AccessProviderKind::Grant);
        ap.role_scope = Some(scope);
        ap
    }

    #[test]
    fn test_account_role_hint() {
        let (ns, hint) = namespace_and_hint(&ap("Sales readers", RoleScope::AccountRole)).unwrap();
        assert_eq!(ns, RoleNamespace::Account);
        assert_eq!(hint, "Sales readers");
    }

    #[test]
    fn test_database_role_hint_with_namespace() {
        let (ns, hint) = namespace_and_hint(&ap("SALES.readers", RoleScope::DatabaseRole)).unwrap();
        assert_eq!(ns, RoleNamespace::Database("SALES".to_string()));
        assert_eq!(hint, "readers");
    }

    #[test]
    fn test_database_role_namespace_fallbacks() {
        let mut from_external = ap("readers", RoleScope::DatabaseRole);
        from_external.external_id = Some("DATABASEROLE###DATABASE:HR###ROLE:READERS".to_string());
        assert_eq!(
            namespace_and_hint(&from_external).unwrap().0,
            RoleNamespace::Database("HR".to_string())
        );

        let mut from_what = ap("readers", RoleScope::DatabaseRole);
        from_what.what.push(WhatItem {
            data_object: DataObjectReference::new("FINANCE.PUBLIC.T", "table"),
            permissions: vec!["SELECT".to_string()],
        });
        assert_eq!(
            namespace_and_hint(&from_what).unwrap().0,
            RoleNamespace::Database("FINANCE".to_string())
        );

        assert!(namespace_and_hint(&ap("readers", RoleScope::DatabaseRole)).is_err());
    }

    #[test]
    fn test_generated_names() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), RANDOM_SUFFIX_LEN);
        assert!(is_generated_from("MASK_PII_", &format!("MASK_PII_{}_VARCHAR", suffix)));
        assert!(is_generated_from("SHARE_X_", &format!("SHARE_X_{}", suffix)));
        assert!(!is_generated_from("MASK_PII_", "MASK_PII_EXTRA_ABCD1234_VARCHAR"));
        assert!(!is_generated_from("MASK_PII_", "OTHER_ABCD1234"));
    }

    #[test]
    fn test_application_role_requires_namespace() {
        assert!(namespace_and_hint(&ap("admins", RoleScope::ApplicationRole)).is_err());
        let (ns, _) = namespace_and_hint(&ap("APP.admins", RoleScope::ApplicationRole)).unwrap();
        assert_eq!(ns, RoleNamespace::Application("APP".to_string()));
    }
}
