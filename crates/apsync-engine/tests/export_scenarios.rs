//! End-to-end export runs against the in-memory repository.

use std::sync::Arc;

use apsync_core::{
    AccessProvider, AccessProviderKind, DataObjectReference, RoleId, SyncConfig, WhatItem,
};
use apsync_engine::{CollectingFeedbackSink, ExportSyncer};
use apsync_repository::{ColumnEntity, DatabaseEntity, GrantOfRole, GrantToRole, MemoryRepository};
use pretty_assertions::assert_eq;

fn warehouse() -> Arc<MemoryRepository> {
    let repo = MemoryRepository::new();
    repo.add_database(DatabaseEntity::new("DB"));
    repo.add_column("DB", "S", "T", ColumnEntity::new("EMAIL", "VARCHAR(256)"));
    Arc::new(repo)
}

fn table_grant(id: &str, name: &str) -> AccessProvider {
    let mut ap = AccessProvider::new(id, name, AccessProviderKind::Grant);
    ap.who.users = vec!["alice".to_string(), "bob".to_string()];
    ap.what.push(WhatItem {
        data_object: DataObjectReference::new("DB.S.T", "table"),
        permissions: vec!["SELECT".to_string()],
    });
    ap
}

async fn export(repo: Arc<MemoryRepository>, aps: Vec<AccessProvider>) -> CollectingFeedbackSink {
    export_with(repo, SyncConfig::default(), aps).await
}

async fn export_with(
    repo: Arc<MemoryRepository>,
    config: SyncConfig,
    aps: Vec<AccessProvider>,
) -> CollectingFeedbackSink {
    let sink = CollectingFeedbackSink::new();
    ExportSyncer::new(repo, config)
        .run(aps, &sink)
        .await
        .unwrap();
    sink
}

fn statements(repo: &MemoryRepository) -> Vec<String> {
    repo.calls()
        .into_iter()
        .filter(|c| !c.starts_with("COMMENT"))
        .collect()
}

#[tokio::test]
async fn new_grant_is_provisioned_before_users_get_it() {
    let repo = warehouse();

    let sink = export(repo.clone(), vec![table_grant("g", "AP1")]).await;

    assert_eq!(
        statements(&repo),
        vec![
            "CREATE ROLE AP1",
            "GRANT USAGE ON DATABASE DB TO ROLE AP1",
            "GRANT USAGE ON SCHEMA DB.S TO ROLE AP1",
            "GRANT SELECT ON TABLE DB.S.T TO ROLE AP1",
            "GRANT ROLE AP1 TO USER alice",
            "GRANT ROLE AP1 TO USER bob",
        ]
    );
    let feedback = sink.get("g").unwrap();
    assert!(feedback.is_success());
    assert_eq!(feedback.actual_name, "AP1");
    assert_eq!(feedback.external_id.as_deref(), Some("AP1"));
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let repo = warehouse();
    let first = export(repo.clone(), vec![table_grant("g", "AP1")]).await;
    repo.clear_calls();

    let mut ap = table_grant("g", "AP1");
    ap.external_id = first.get("g").unwrap().external_id;
    let second = export(repo.clone(), vec![ap]).await;

    assert!(statements(&repo).is_empty());
    assert!(second.get("g").unwrap().is_success());
}

#[tokio::test]
async fn renamed_access_provider_renames_the_role() {
    let repo = warehouse();
    let old = RoleId::account("OLD_NAME");
    repo.add_role(old.clone(), "SYSADMIN");
    repo.add_role_grant(&old, GrantToRole::new("USAGE", "DATABASE", "DB"));

    let mut ap = AccessProvider::new("g", "NEW_NAME", AccessProviderKind::Grant);
    ap.external_id = Some("OLD_NAME".to_string());
    ap.what.push(WhatItem {
        data_object: DataObjectReference::new("DB", "database"),
        permissions: vec!["USAGE".to_string()],
    });
    let sink = export(repo.clone(), vec![ap]).await;

    assert_eq!(statements(&repo), vec!["RENAME ROLE OLD_NAME TO NEW_NAME"]);
    assert!(repo.has_role(&RoleId::account("NEW_NAME")));
    assert!(!repo.has_role(&old));
    assert_eq!(
        sink.get("g").unwrap().external_id.as_deref(),
        Some("NEW_NAME")
    );
}

#[tokio::test]
async fn mask_references_role_created_in_the_same_run() {
    let repo = warehouse();
    let mut mask = AccessProvider::new("m", "PII", AccessProviderKind::Mask);
    mask.who.inherit_from.push("ID:g".to_string());
    mask.what.push(WhatItem {
        data_object: DataObjectReference::new("DB.S.T.EMAIL", "column"),
        permissions: Vec::new(),
    });

    let sink = export(repo.clone(), vec![table_grant("g", "AP1"), mask]).await;

    let names = repo.masking_policy_names();
    assert_eq!(names.len(), 1);
    let policy = repo.masking_policy(&names[0]).unwrap();
    assert!(policy.body.contains("IS_ROLE_IN_SESSION('AP1')"));

    let calls = statements(&repo);
    let mask_at = calls
        .iter()
        .position(|c| c.starts_with("CREATE MASKING POLICY"))
        .unwrap();
    let role_at = calls.iter().position(|c| c == "CREATE ROLE AP1").unwrap();
    assert!(mask_at < role_at);

    assert_eq!(sink.records().len(), 2);
    assert_eq!(
        sink.get("m").unwrap().resource_type.as_deref(),
        Some("maskingPolicy")
    );
}

#[tokio::test]
async fn unsupported_kind_gets_an_error_and_the_rest_proceeds() {
    let repo = warehouse();
    let purpose = AccessProvider::new("p", "Marketing", AccessProviderKind::Purpose);

    let sink = export(repo.clone(), vec![purpose, table_grant("g", "AP1")]).await;

    assert!(!sink.get("p").unwrap().errors.is_empty());
    assert!(sink.get("g").unwrap().is_success());
    assert!(repo.has_role(&RoleId::account("AP1")));
}

#[tokio::test]
async fn role_prefix_does_not_hide_existing_roles() {
    let repo = warehouse();
    let role = RoleId::account("READERS");
    repo.add_role(role.clone(), "SYSADMIN");
    repo.add_role_grant(&role, GrantToRole::new("USAGE", "DATABASE", "OLD"));
    repo.add_role_holder(&role, GrantOfRole::new("USER", "bob"));
    let config = SyncConfig {
        role_prefix: "APS_".to_string(),
        ..SyncConfig::default()
    };

    let mut ap = table_grant("g", "Readers");
    ap.who.users = vec!["alice".to_string()];
    ap.external_id = Some("READERS".to_string());
    let sink = export_with(repo.clone(), config.clone(), vec![ap]).await;

    assert_eq!(
        statements(&repo),
        vec![
            "GRANT USAGE ON DATABASE DB TO ROLE READERS",
            "GRANT USAGE ON SCHEMA DB.S TO ROLE READERS",
            "GRANT SELECT ON TABLE DB.S.T TO ROLE READERS",
            "REVOKE USAGE ON DATABASE OLD FROM ROLE READERS",
            "GRANT ROLE READERS TO USER alice",
            "REVOKE ROLE READERS FROM USER bob",
        ]
    );
    let feedback = sink.get("g").unwrap();
    assert!(feedback.is_success());
    assert!(feedback.warnings.is_empty());

    // A new Access Provider whose name is already taken adopts the role.
    repo.clear_calls();
    let sink = export_with(repo.clone(), config, vec![table_grant("n", "Readers")]).await;
    assert!(!statements(&repo).iter().any(|c| c.starts_with("CREATE ROLE")));
    assert!(sink.get("n").unwrap().is_success());
}

#[tokio::test]
async fn future_grants_are_not_reissued() {
    let repo = warehouse();
    let config = SyncConfig {
        create_future_grants: true,
        ..SyncConfig::default()
    };
    let schema_grant = || {
        let mut ap = AccessProvider::new("g", "AP1", AccessProviderKind::Grant);
        ap.what.push(WhatItem {
            data_object: DataObjectReference::new("DB.S", "schema"),
            permissions: vec!["SELECT".to_string()],
        });
        ap
    };

    let first = export_with(repo.clone(), config.clone(), vec![schema_grant()]).await;
    assert!(statements(&repo).contains(&"GRANT SELECT ON FUTURE TABLES DB.S TO ROLE AP1".to_string()));
    repo.clear_calls();

    let mut ap = schema_grant();
    ap.external_id = first.get("g").unwrap().external_id;
    let second = export_with(repo.clone(), config, vec![ap]).await;

    assert_eq!(statements(&repo), Vec::<String>::new());
    assert!(second.get("g").unwrap().is_success());
}
