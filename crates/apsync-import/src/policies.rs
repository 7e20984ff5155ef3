//! Masking and row access policies as read-only Access Providers.

use apsync_core::{AccessProviderKind, DataObjectReference, ExternalAccessProvider, WhatItem};
use apsync_repository::{PolicyEntity, PolicyKind, Repository};

use crate::error::ImportError;

/// Import every policy of `kind` in `database`.
///
/// Policies whose name starts with `managed_prefix` were generated by export
/// and are left out.
pub async fn import_policies(
    repo: &dyn Repository,
    kind: PolicyKind,
    database: &str,
    managed_prefix: &str,
) -> Result<Vec<ExternalAccessProvider>, ImportError> {
    let mut out = Vec::new();
    for policy in repo.get_policies(kind, database).await? {
        if !managed_prefix.is_empty() && policy.name.starts_with(managed_prefix) {
            tracing::debug!(policy = %policy.name, "skipping generated policy");
            continue;
        }
        if let Some(ap) = import_policy(repo, &policy).await? {
            out.push(ap);
        }
    }
    Ok(out)
}

async fn import_policy(
    repo: &dyn Repository,
    policy: &PolicyEntity,
) -> Result<Option<ExternalAccessProvider>, ImportError> {
    let full_name = format!("{}.{}.{}", policy.database, policy.schema, policy.name);

    let description = match repo
        .describe_policy(policy.kind, &policy.database, &policy.schema, &policy.name)
        .await
    {
        Ok(description) => description,
        Err(err) if err.is_does_not_exist() => {
            tracing::warn!(policy = %full_name, "policy vanished while importing");
            return Ok(None);
        }
        Err(err) => return Err(ImportError::read(&full_name, err)),
    };
    let references = repo
        .get_policy_references(&policy.database, &policy.schema, &policy.name)
        .await
        .map_err(|err| ImportError::read(&full_name, err))?;

    let kind = match policy.kind {
        PolicyKind::Masking => AccessProviderKind::Mask,
        PolicyKind::RowAccess => AccessProviderKind::Filtered,
    };
    let mut ap = ExternalAccessProvider::new(&full_name, &policy.name, kind);
    ap.resource_type = Some(policy.kind.resource_type().to_string());
    ap.not_internalizable = true;
    ap.policy = Some(description.body);
    ap.what = references
        .iter()
        .map(|reference| {
            let data_object = match &reference.column {
                Some(column) => DataObjectReference::new(
                    format!("{}.{}", reference.table_path(), column),
                    "column",
                ),
                None => DataObjectReference::new(reference.table_path(), "table"),
            };
            WhatItem {
                data_object,
                permissions: Vec::new(),
            }
        })
        .collect();

    tracing::debug!(policy = %full_name, references = ap.what.len(), "imported policy");
    Ok(Some(ap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apsync_repository::{MaskingPolicy, MemoryRepository, RowAccessPolicy};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_policies_import_as_not_internalizable() {
        let repo = MemoryRepository::new();
        repo.add_masking_policy(MaskingPolicy {
            database: "DB".to_string(),
            schema: "S".to_string(),
            name: "PII".to_string(),
            data_type: "VARCHAR".to_string(),
            body: "CASE WHEN TRUE THEN val ELSE NULL END".to_string(),
            columns: vec!["T.EMAIL".to_string()],
        });
        repo.add_masking_policy(MaskingPolicy {
            database: "DB".to_string(),
            schema: "S".to_string(),
            name: "APSYNC_MASK_PII_ABCD1234_VARCHAR".to_string(),
            data_type: "VARCHAR".to_string(),
            body: "NULL".to_string(),
            columns: Vec::new(),
        });
        repo.add_row_access_policy(RowAccessPolicy {
            database: "DB".to_string(),
            schema: "S".to_string(),
            table: "T".to_string(),
            name: "REGION_FILTER".to_string(),
            arguments: vec![("REGION".to_string(), "VARCHAR".to_string())],
            body: "REGION = 'EU'".to_string(),
        });

        let masks = import_policies(&repo, PolicyKind::Masking, "DB", "APSYNC_MASK_")
            .await
            .unwrap();
        assert_eq!(masks.len(), 1);
        assert_eq!(masks[0].external_id, "DB.S.PII");
        assert_eq!(masks[0].kind, AccessProviderKind::Mask);
        assert!(masks[0].not_internalizable);
        assert_eq!(
            masks[0].what[0].data_object,
            DataObjectReference::new("DB.S.T.EMAIL", "column")
        );

        let filters = import_policies(&repo, PolicyKind::RowAccess, "DB", "APSYNC_FILTER_")
            .await
            .unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].policy.as_deref(), Some("REGION = 'EU'"));
        assert_eq!(filters[0].resource_type.as_deref(), Some("rowAccessPolicy"));
        assert_eq!(
            filters[0].what[0].data_object,
            DataObjectReference::new("DB.S.T", "table")
        );
    }
}
