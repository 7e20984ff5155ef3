//! Masks applier.
//!
//! A mask Access Provider becomes one masking policy per schema and column
//! data type, named `<base>_<TYPE>` where the base is
//! `<mask prefix><name>_<random>`. The base is the Access Provider's external
//! id. Every update creates a fresh base; policies left behind by earlier
//! runs are found by prefix and dropped.

use std::collections::{BTreeMap, BTreeSet};

use apsync_core::{AccessProvider, AccessProviderFeedback, ObjectKind};
use apsync_repository::{MaskingPolicy, PolicyKind};
use thiserror::Error;

use crate::classify::{Action, Classification, Mutation};
use crate::context::RunContext;
use crate::error::SyncError;
use crate::feedback::FeedbackSink;
use crate::naming::{is_generated_from, object_names};
use crate::who::who_clause;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MaskError {
    #[error("unknown mask type '{0}'")]
    UnknownType(String),

    #[error("mask type {mask} cannot mask columns of type {data_type}")]
    UnsupportedType { mask: String, data_type: String },
}

/// Produces the masked replacement for the policy argument `val`.
pub trait MaskGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    fn masked_value(&self, data_type: &str) -> Result<String, MaskError>;
}

/// Replaces every value with NULL. Works for every type.
pub struct NullMask;

impl MaskGenerator for NullMask {
    fn name(&self) -> &'static str {
        "NULL"
    }

    fn masked_value(&self, _data_type: &str) -> Result<String, MaskError> {
        Ok("NULL".to_string())
    }
}

pub struct Sha256Mask;

impl MaskGenerator for Sha256Mask {
    fn name(&self) -> &'static str {
        "SHA256"
    }

    fn masked_value(&self, data_type: &str) -> Result<String, MaskError> {
        require_string(self.name(), data_type)?;
        Ok("SHA2(val, 256)".to_string())
    }
}

pub struct MaskedStringMask;

impl MaskGenerator for MaskedStringMask {
    fn name(&self) -> &'static str {
        "MASKED_STRING"
    }

    fn masked_value(&self, data_type: &str) -> Result<String, MaskError> {
        require_string(self.name(), data_type)?;
        Ok("REGEXP_REPLACE(val, '.', '*')".to_string())
    }
}

const STRING_TYPES: &[&str] = &[
    "VARCHAR",
    "CHAR",
    "CHARACTER",
    "NCHAR",
    "NVARCHAR",
    "NVARCHAR2",
    "STRING",
    "TEXT",
];

fn require_string(mask: &str, data_type: &str) -> Result<(), MaskError> {
    if STRING_TYPES.contains(&data_type) {
        Ok(())
    } else {
        Err(MaskError::UnsupportedType {
            mask: mask.to_string(),
            data_type: data_type.to_string(),
        })
    }
}

/// Look up a mask generator by its mask type.
pub fn mask_generator(mask_type: &str) -> Result<Box<dyn MaskGenerator>, MaskError> {
    match mask_type.trim().to_ascii_uppercase().as_str() {
        "NULL" => Ok(Box::new(NullMask)),
        "SHA256" => Ok(Box::new(Sha256Mask)),
        "MASKED_STRING" => Ok(Box::new(MaskedStringMask)),
        other => Err(MaskError::UnknownType(other.to_string())),
    }
}

/// `VARCHAR(16777216)` → `VARCHAR`.
pub fn normalize_data_type(data_type: &str) -> String {
    data_type
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_uppercase()
}

/// NULL stands in for a mask that cannot be produced, with a warning.
fn null_fallback(err: MaskError, warnings: &mut Vec<String>) -> String {
    let message = format!("{}, falling back to a NULL mask", err);
    tracing::warn!("{}", message);
    warnings.push(message);
    "NULL".to_string()
}

pub async fn apply_masks(
    ctx: &mut RunContext,
    classification: &Classification,
    sink: &dyn FeedbackSink,
) -> Result<(), SyncError> {
    if classification.masks.is_empty() {
        return Ok(());
    }
    tracing::info!(masks = classification.masks.len(), "applying masks");

    for mutation in &classification.masks {
        let feedback = match mutation.action {
            Action::Delete => remove_mask(ctx, mutation).await?,
            _ => upsert_mask(ctx, classification, mutation).await?,
        };
        sink.add_feedback(feedback);
    }
    Ok(())
}

fn mask_feedback(ap: &AccessProvider, base: &str) -> AccessProviderFeedback {
    AccessProviderFeedback {
        actual_name: base.to_string(),
        external_id: Some(base.to_string()),
        resource_type: Some(PolicyKind::Masking.resource_type().to_string()),
        ..AccessProviderFeedback::new(&ap.id)
    }
}

fn fail(feedback: &mut AccessProviderFeedback, step: &str, err: impl Into<SyncError>) -> Result<(), SyncError> {
    let err = err.into();
    if err.is_fatal() {
        return Err(err);
    }
    tracing::error!(access_provider = %feedback.access_provider, step, error = %err, "mask step failed");
    feedback.errors.push(format!("{}: {}", step, err));
    Ok(())
}

async fn remove_mask(ctx: &mut RunContext, mutation: &Mutation) -> Result<AccessProviderFeedback, SyncError> {
    let ap = &mutation.access_provider;
    let Some(base) = ap.external_id.as_deref() else {
        tracing::warn!(access_provider = %ap.id, "mask delete without external id, nothing to do");
        return Ok(AccessProviderFeedback::new(&ap.id));
    };
    let mut feedback = mask_feedback(ap, base);
    if let Err(err) = drop_masks_with_base(ctx, base, &BTreeSet::new()).await {
        fail(&mut feedback, "drop masking policies", err)?;
    }
    Ok(feedback)
}

/// Drop every masking policy named `<base>_<TYPE>` outside `keep`.
async fn drop_masks_with_base(
    ctx: &mut RunContext,
    base: &str,
    keep: &BTreeSet<String>,
) -> Result<(), SyncError> {
    let prefix = format!("{}_", base);
    let databases: Vec<String> = ctx
        .databases()
        .await?
        .iter()
        .filter(|d| !d.is_shared())
        .map(|d| d.name.clone())
        .collect();

    for database in databases {
        if ctx.config().is_database_excluded(&database) {
            continue;
        }
        let policies = ctx
            .repo()
            .get_policies(PolicyKind::Masking, &database)
            .await?;
        for policy in policies.iter().filter(|p| p.name.starts_with(&prefix)) {
            let full_name = format!("{}.{}.{}", policy.database, policy.schema, policy.name);
            if keep.contains(&full_name) {
                continue;
            }
            drop_policy(ctx, &policy.database, &policy.schema, &policy.name).await?;
        }
    }
    Ok(())
}

async fn drop_policy(ctx: &RunContext, database: &str, schema: &str, name: &str) -> Result<(), SyncError> {
    match ctx.repo().drop_masking_policy(database, schema, name).await {
        Ok(()) => {
            tracing::info!(database, schema, policy = name, "dropped masking policy");
            Ok(())
        }
        Err(err) if err.is_does_not_exist() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// A column to mask, with its normalized data type.
struct MaskedColumn {
    database: String,
    schema: String,
    table: String,
    column: String,
    data_type: String,
}

async fn resolve_columns(
    ctx: &mut RunContext,
    ap: &AccessProvider,
    warnings: &mut Vec<String>,
) -> Result<Vec<MaskedColumn>, SyncError> {
    let mut columns = Vec::new();
    for item in &ap.what {
        let object = &item.data_object;
        if object.kind() != ObjectKind::Column {
            warnings.push(format!(
                "masks only apply to columns, ignoring {} {}",
                object.object_type, object.full_name
            ));
            continue;
        }
        let path = object.path();
        let [database, schema, table, column] = path.as_slice() else {
            warnings.push(format!("invalid column name '{}'", object.full_name));
            continue;
        };
        let data_type = ctx
            .columns(database, schema, table)
            .await?
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
            .map(|c| normalize_data_type(&c.data_type));
        match data_type {
            Some(data_type) => columns.push(MaskedColumn {
                database: database.to_string(),
                schema: schema.to_string(),
                table: table.to_string(),
                column: column.to_string(),
                data_type,
            }),
            None => warnings.push(format!(
                "column {} does not exist, not masking it",
                object.full_name
            )),
        }
    }
    Ok(columns)
}

async fn upsert_mask(
    ctx: &mut RunContext,
    classification: &Classification,
    mutation: &Mutation,
) -> Result<AccessProviderFeedback, SyncError> {
    let ap = &mutation.access_provider;
    let prefix = ctx.config().mask_prefix.clone();
    let (stem, base) = match object_names(ctx, &prefix, ap.hint()) {
        Ok(names) => names,
        Err(err) => {
            let mut feedback = AccessProviderFeedback::new(&ap.id);
            fail(&mut feedback, "derive mask name", err)?;
            return Ok(feedback);
        }
    };
    let mut feedback = mask_feedback(ap, &base);

    let columns = match resolve_columns(ctx, ap, &mut feedback.warnings).await {
        Ok(columns) => columns,
        Err(err) => {
            fail(&mut feedback, "resolve columns", err)?;
            return Ok(feedback);
        }
    };

    let who = who_clause(&ap.who, &classification.roles_by_id);
    feedback.warnings.extend(who.warnings);

    let mask_type = ap
        .mask_type
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| ctx.config().default_mask_type.clone());
    let generator = mask_generator(&mask_type);

    let mut groups: BTreeMap<(String, String, String), Vec<String>> = BTreeMap::new();
    for column in columns {
        groups
            .entry((column.database, column.schema, column.data_type))
            .or_default()
            .push(format!("{}.{}", column.table, column.column));
    }

    let mut created = BTreeSet::new();
    let mut schemas = BTreeSet::new();
    for ((database, schema, data_type), columns) in groups {
        let masked = match &generator {
            Ok(generator) => generator.masked_value(&data_type),
            Err(err) => Err(err.clone()),
        }
        .unwrap_or_else(|err| null_fallback(err, &mut feedback.warnings));
        let policy = MaskingPolicy {
            name: format!("{}_{}", base, data_type),
            body: format!("CASE WHEN {} THEN val ELSE {} END", who.sql, masked),
            database: database.clone(),
            schema: schema.clone(),
            data_type,
            columns,
        };
        match ctx.repo().create_masking_policy(&policy).await {
            Ok(()) => {
                tracing::info!(access_provider = %ap.id, policy = %policy.full_name(), "created masking policy");
                created.insert(policy.full_name());
            }
            Err(err) => fail(&mut feedback, "create masking policy", err)?,
        }
        schemas.insert((database, schema));
    }

    // Same-name leftovers of earlier runs, in the schemas touched now.
    for (database, schema) in &schemas {
        let stale = match ctx
            .repo()
            .get_policies_like(PolicyKind::Masking, database, schema, &stem)
            .await
        {
            Ok(stale) => stale,
            Err(err) => {
                fail(&mut feedback, "list masking policies", err)?;
                continue;
            }
        };
        for policy in stale {
            let full_name = format!("{}.{}.{}", policy.database, policy.schema, policy.name);
            if created.contains(&full_name) || !is_generated_from(&stem, &policy.name) {
                continue;
            }
            if let Err(err) = drop_policy(ctx, &policy.database, &policy.schema, &policy.name).await {
                fail(&mut feedback, "drop stale masking policy", err)?;
            }
        }
    }

    if let Some(previous) = ap.external_id.as_deref().filter(|p| *p != base) {
        if let Err(err) = drop_masks_with_base(ctx, previous, &created).await {
            fail(&mut feedback, "drop previous masking policies", err)?;
        }
    }
    Ok(feedback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::feedback::CollectingFeedbackSink;
    use apsync_core::{AccessProviderKind, DataObjectReference, SyncConfig, WhatItem};
    use apsync_repository::{ColumnEntity, DatabaseEntity, MemoryRepository};
    use std::sync::Arc;

    fn mask_ap(id: &str, columns: &[&str], mask_type: Option<&str>) -> AccessProvider {
        let mut ap = AccessProvider::new(id, "PII", AccessProviderKind::Mask);
        ap.mask_type = mask_type.map(str::to_string);
        ap.who.users.push("alice".to_string());
        for column in columns {
            ap.what.push(WhatItem {
                data_object: DataObjectReference::new(*column, "column"),
                permissions: Vec::new(),
            });
        }
        ap
    }

    fn seeded() -> Arc<MemoryRepository> {
        let repo = MemoryRepository::new();
        repo.add_database(DatabaseEntity::new("DB"));
        repo.add_column("DB", "S", "T", ColumnEntity::new("EMAIL", "VARCHAR(256)"));
        repo.add_column("DB", "S", "T", ColumnEntity::new("NAME", "TEXT"));
        repo.add_column("DB", "S", "T", ColumnEntity::new("AGE", "NUMBER(38,0)"));
        Arc::new(repo)
    }

    async fn run(repo: Arc<MemoryRepository>, aps: Vec<AccessProvider>) -> CollectingFeedbackSink {
        let mut ctx = RunContext::new(repo, SyncConfig::default()).unwrap();
        let classification = classify(&mut ctx, aps).await.unwrap();
        let sink = CollectingFeedbackSink::new();
        apply_masks(&mut ctx, &classification, &sink).await.unwrap();
        sink
    }

    #[test]
    fn test_generators() {
        assert_eq!(mask_generator("null").unwrap().masked_value("NUMBER").unwrap(), "NULL");
        assert_eq!(
            mask_generator("SHA256").unwrap().masked_value("VARCHAR").unwrap(),
            "SHA2(val, 256)"
        );
        assert!(mask_generator("SHA256").unwrap().masked_value("NUMBER").is_err());
        assert_eq!(
            mask_generator("ROT13").err(),
            Some(MaskError::UnknownType("ROT13".to_string()))
        );
        assert_eq!(normalize_data_type("varchar(16777216)"), "VARCHAR");
    }

    #[tokio::test]
    async fn test_one_policy_per_type() {
        let repo = seeded();
        let sink = run(
            repo.clone(),
            vec![mask_ap("m", &["DB.S.T.EMAIL", "DB.S.T.NAME", "DB.S.T.AGE"], Some("SHA256"))],
        )
        .await;

        let feedback = sink.get("m").unwrap();
        assert!(feedback.is_success());
        let base = feedback.external_id.clone().unwrap();
        assert!(base.starts_with("APSYNC_MASK_PII_"));
        assert_eq!(feedback.resource_type.as_deref(), Some("maskingPolicy"));

        let mut names = repo.masking_policy_names();
        names.sort();
        assert_eq!(
            names,
            vec![
                format!("DB.S.{}_NUMBER", base),
                format!("DB.S.{}_TEXT", base),
                format!("DB.S.{}_VARCHAR", base),
            ]
        );

        // NUMBER cannot be hashed: NULL with a warning instead.
        let number = repo.masking_policy(&format!("DB.S.{}_NUMBER", base)).unwrap();
        assert_eq!(
            number.body,
            "CASE WHEN current_user() IN ('alice') THEN val ELSE NULL END"
        );
        assert_eq!(feedback.warnings.len(), 1);
        let text = repo.masking_policy(&format!("DB.S.{}_TEXT", base)).unwrap();
        assert!(text.body.contains("SHA2(val, 256)"));
    }

    #[tokio::test]
    async fn test_update_replaces_previous_policies() {
        let repo = seeded();
        let first = run(repo.clone(), vec![mask_ap("m", &["DB.S.T.EMAIL"], None)]).await;
        let old_base = first.get("m").unwrap().external_id.unwrap();

        let mut again = mask_ap("m", &["DB.S.T.EMAIL"], None);
        again.external_id = Some(old_base.clone());
        let second = run(repo.clone(), vec![again]).await;
        let new_base = second.get("m").unwrap().external_id.unwrap();

        assert_ne!(old_base, new_base);
        assert_eq!(
            repo.masking_policy_names(),
            vec![format!("DB.S.{}_VARCHAR", new_base)]
        );
    }

    #[tokio::test]
    async fn test_delete_and_non_column_items() {
        let repo = seeded();
        let first = run(
            repo.clone(),
            vec![mask_ap("m", &["DB.S.T.EMAIL", "DB.S.T.MISSING"], None)],
        )
        .await;
        let feedback = first.get("m").unwrap();
        assert_eq!(feedback.warnings.len(), 1);

        let mut gone = mask_ap("m", &[], None);
        gone.external_id = feedback.external_id.clone();
        gone.delete = true;
        let second = run(repo.clone(), vec![gone]).await;

        assert!(second.get("m").unwrap().is_success());
        assert!(repo.masking_policy_names().is_empty());
    }
}
