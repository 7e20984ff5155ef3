//! Filters applier.
//!
//! Filter Access Providers are grouped by the table they target. Each table
//! gets a single row access policy whose body ORs the rule of every Access
//! Provider on it, each guarded by that Access Provider's who clause:
//!
//! ```text
//! (who_1 AND (expr_1)) OR (who_2 AND (expr_2)) ...
//! ```
//!
//! The external id of every Access Provider in the group is
//! `<db>.<schema>.<policy>`.

use std::collections::{BTreeMap, BTreeSet};

use apsync_core::{
    AccessProvider, AccessProviderFeedback, AggregatorOperator, ComparisonOperator,
    ExpressionVisitor, Literal, Reference, ReferenceEntityType,
};
use apsync_repository::{PolicyKind, RowAccessPolicy};
use regex::Regex;
use thiserror::Error;

use crate::classify::{Action, Classification, Mutation};
use crate::context::RunContext;
use crate::error::SyncError;
use crate::feedback::FeedbackSink;
use crate::masks::normalize_data_type;
use crate::naming::{is_generated_from, object_names};
use crate::who::who_clause;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("both a structured filter and a policy rule are set")]
    BothCriteria,

    #[error("no filter criteria set")]
    NoCriteria,

    #[error("aggregator without operands")]
    EmptyAggregator,

    #[error("empty column reference")]
    EmptyReference,

    #[error("filter does not target a table")]
    NoTable,

    #[error("filter targets more than one table: {0}")]
    MultipleTables(String),

    #[error("column {column} does not exist in {table}")]
    UnknownColumn { column: String, table: String },

    #[error("invalid placeholder pattern: {0}")]
    Pattern(String),
}

const LEGACY_PLACEHOLDER: &str = r"\{([A-Za-z0-9_$]+)\}";

/// SQL for one Access Provider's rule and the columns it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFilter {
    pub sql: String,
    pub arguments: Vec<String>,
}

/// Renders a filter expression tree to SQL, collecting the referenced columns.
#[derive(Debug, Default)]
pub struct SqlFilterVisitor {
    arguments: Vec<String>,
}

impl SqlFilterVisitor {
    pub fn into_arguments(self) -> Vec<String> {
        self.arguments
    }

    fn argument(&mut self, column: &str) {
        if !self.arguments.iter().any(|a| a == column) {
            self.arguments.push(column.to_string());
        }
    }
}

impl ExpressionVisitor for SqlFilterVisitor {
    type Output = String;
    type Error = FilterError;

    fn visit_literal(&mut self, literal: &Literal) -> Result<String, FilterError> {
        Ok(match literal {
            Literal::Bool(true) => "TRUE".to_string(),
            Literal::Bool(false) => "FALSE".to_string(),
            Literal::Int(value) => value.to_string(),
            Literal::Float(value) => value.to_string(),
            Literal::String(value) => format!("'{}'", value.replace('\'', "''")),
        })
    }

    fn visit_reference(&mut self, reference: &Reference) -> Result<String, FilterError> {
        let column = match reference.entity_type {
            ReferenceEntityType::DataObjectById => reference
                .entity_id
                .rsplit('.')
                .next()
                .unwrap_or_default(),
            ReferenceEntityType::ColumnReferenceByName => reference.entity_id.as_str(),
        };
        if column.is_empty() {
            return Err(FilterError::EmptyReference);
        }
        self.argument(column);
        Ok(column.to_string())
    }

    fn visit_comparison(
        &mut self,
        operator: ComparisonOperator,
        left: String,
        right: String,
    ) -> Result<String, FilterError> {
        Ok(format!("({} {} {})", left, operator.symbol(), right))
    }

    fn visit_aggregator(
        &mut self,
        operator: AggregatorOperator,
        operands: Vec<String>,
    ) -> Result<String, FilterError> {
        if operands.is_empty() {
            return Err(FilterError::EmptyAggregator);
        }
        let joiner = match operator {
            AggregatorOperator::And => " AND ",
            AggregatorOperator::Or => " OR ",
        };
        Ok(format!("({})", operands.join(joiner)))
    }

    fn visit_not(&mut self, operand: String) -> Result<String, FilterError> {
        Ok(format!("(NOT {})", operand))
    }
}

/// Substitute `{column}` placeholders of a legacy policy rule.
pub fn render_legacy_rule(rule: &str) -> Result<RenderedFilter, FilterError> {
    let placeholder =
        Regex::new(LEGACY_PLACEHOLDER).map_err(|e| FilterError::Pattern(e.to_string()))?;
    let mut arguments: Vec<String> = Vec::new();
    for captures in placeholder.captures_iter(rule) {
        let column = &captures[1];
        if !arguments.iter().any(|a| a == column) {
            arguments.push(column.to_string());
        }
    }
    let sql = placeholder.replace_all(rule, "$1").into_owned();
    Ok(RenderedFilter { sql, arguments })
}

/// Render the rule of a filter Access Provider.
pub fn render_filter(ap: &AccessProvider) -> Result<RenderedFilter, FilterError> {
    match (&ap.filter_criteria, &ap.policy_rule) {
        (Some(_), Some(_)) => Err(FilterError::BothCriteria),
        (Some(expression), None) => {
            let mut visitor = SqlFilterVisitor::default();
            let sql = expression.accept(&mut visitor)?;
            Ok(RenderedFilter {
                sql,
                arguments: visitor.into_arguments(),
            })
        }
        (None, Some(rule)) if !rule.trim().is_empty() => render_legacy_rule(rule),
        _ => Err(FilterError::NoCriteria),
    }
}

/// `(database, schema, table)` targeted by a filter Access Provider.
fn target_table(ap: &AccessProvider) -> Result<(String, String, String), FilterError> {
    let mut tables: Vec<(String, String, String)> = Vec::new();
    for item in &ap.what {
        let object = &item.data_object;
        if !object.kind().is_table_like() {
            continue;
        }
        if let [database, schema, table] = object.path().as_slice() {
            let target = (database.to_string(), schema.to_string(), table.to_string());
            if !tables.contains(&target) {
                tables.push(target);
            }
        }
    }
    match tables.len() {
        0 => Err(FilterError::NoTable),
        1 => Ok(tables.remove(0)),
        _ => Err(FilterError::MultipleTables(
            tables
                .iter()
                .map(|(d, s, t)| format!("{}.{}.{}", d, s, t))
                .collect::<Vec<_>>()
                .join(", "),
        )),
    }
}

/// Mark every member as failed at `step`.
fn fail_members(members: Vec<Member<'_>>, step: &str, message: &str) -> Vec<AccessProviderFeedback> {
    members
        .into_iter()
        .map(|mut member| {
            fail_member(&mut member.feedback, step, message);
            member.feedback
        })
        .collect()
}

fn fail_member(feedback: &mut AccessProviderFeedback, step: &str, message: &str) {
    tracing::error!(access_provider = %feedback.access_provider, step, error = message, "filter step failed");
    feedback.errors.push(format!("{}: {}", step, message));
}

fn filter_feedback(ap: &AccessProvider) -> AccessProviderFeedback {
    AccessProviderFeedback {
        resource_type: Some(PolicyKind::RowAccess.resource_type().to_string()),
        ..AccessProviderFeedback::new(&ap.id)
    }
}

fn fail(feedback: &mut AccessProviderFeedback, step: &str, err: impl Into<SyncError>) -> Result<(), SyncError> {
    let err = err.into();
    if err.is_fatal() {
        return Err(err);
    }
    tracing::error!(access_provider = %feedback.access_provider, step, error = %err, "filter step failed");
    feedback.errors.push(format!("{}: {}", step, err));
    Ok(())
}

/// One Access Provider's contribution to its table's policy.
struct Member<'a> {
    ap: &'a AccessProvider,
    feedback: AccessProviderFeedback,
    rendered: RenderedFilter,
}

type TableKey = (String, String, String);

pub async fn apply_filters(
    ctx: &mut RunContext,
    classification: &Classification,
    sink: &dyn FeedbackSink,
) -> Result<(), SyncError> {
    if classification.filters.is_empty() {
        return Ok(());
    }
    tracing::info!(filters = classification.filters.len(), "applying filters");

    let (deletes, upserts): (Vec<&Mutation>, Vec<&Mutation>) = classification
        .filters
        .iter()
        .partition(|m| m.action == Action::Delete);

    let mut groups: BTreeMap<TableKey, Vec<Member<'_>>> = BTreeMap::new();
    for mutation in upserts {
        let ap = &mutation.access_provider;
        let mut feedback = filter_feedback(ap);
        let prepared = target_table(ap).and_then(|table| Ok((table, render_filter(ap)?)));
        match prepared {
            Ok((table, rendered)) => groups.entry(table).or_default().push(Member {
                ap,
                feedback,
                rendered,
            }),
            Err(err) => {
                fail(&mut feedback, "build filter", err)?;
                sink.add_feedback(feedback);
            }
        }
    }

    let mut created = BTreeSet::new();
    for (table, members) in groups {
        let finished = apply_table(ctx, classification, &table, members, &mut created).await?;
        for feedback in finished {
            sink.add_feedback(feedback);
        }
    }

    for mutation in deletes {
        let feedback = remove_filter(ctx, mutation, &created).await?;
        sink.add_feedback(feedback);
    }
    Ok(())
}

/// Build and install the policy of one table.
async fn apply_table(
    ctx: &mut RunContext,
    classification: &Classification,
    table: &TableKey,
    mut members: Vec<Member<'_>>,
    created: &mut BTreeSet<String>,
) -> Result<Vec<AccessProviderFeedback>, SyncError> {
    let (database, schema, table_name) = table;
    let table_path = format!("{}.{}.{}", database, schema, table_name);

    let column_types: Vec<(String, String)> = match ctx.columns(database, schema, table_name).await {
        Ok(columns) => columns
            .iter()
            .map(|c| (c.name.clone(), normalize_data_type(&c.data_type)))
            .collect(),
        Err(err) if err.is_fatal() => return Err(err),
        Err(err) => return Ok(fail_members(members, "list columns", &err.to_string())),
    };

    // Members whose columns all exist take part in the policy.
    let mut arguments: Vec<(String, String)> = Vec::new();
    let mut clauses = Vec::new();
    let mut included = Vec::new();
    for (index, member) in members.iter_mut().enumerate() {
        let mut member_arguments = Vec::new();
        let mut missing = None;
        for column in &member.rendered.arguments {
            match column_types
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
            {
                Some((name, data_type)) => member_arguments.push((name.clone(), data_type.clone())),
                None => {
                    missing = Some(FilterError::UnknownColumn {
                        column: column.clone(),
                        table: table_path.clone(),
                    });
                    break;
                }
            }
        }
        if let Some(err) = missing {
            fail(&mut member.feedback, "build filter", err)?;
            continue;
        }
        for argument in member_arguments {
            if !arguments.iter().any(|(name, _)| name == &argument.0) {
                arguments.push(argument);
            }
        }
        let who = who_clause(&member.ap.who, &classification.roles_by_id);
        member.feedback.warnings.extend(who.warnings);
        clauses.push(format!("({} AND ({}))", who.sql, member.rendered.sql));
        included.push(index);
    }

    if clauses.is_empty() {
        return Ok(members.into_iter().map(|m| m.feedback).collect());
    }

    let prefix = ctx.config().filter_prefix.clone();
    let (stem, base) = match object_names(ctx, &prefix, table_name) {
        Ok(names) => names,
        Err(err) => return Ok(fail_members(members, "derive filter name", &err.to_string())),
    };

    let policy = RowAccessPolicy {
        database: database.clone(),
        schema: schema.clone(),
        table: table_name.clone(),
        name: base.clone(),
        arguments,
        body: clauses.join(" OR "),
    };
    let external_id = policy.full_name();
    let install = ctx.repo().update_filter(&policy).await;

    match install {
        Ok(()) => {
            tracing::info!(table = %table_path, policy = %external_id, members = included.len(), "installed row access policy");
            created.insert(external_id.clone());
            for index in &included {
                let feedback = &mut members[*index].feedback;
                feedback.actual_name = base.clone();
                feedback.external_id = Some(external_id.clone());
            }
        }
        Err(err) => {
            let err = SyncError::from(err);
            if err.is_fatal() {
                return Err(err);
            }
            let message = err.to_string();
            for index in &included {
                fail_member(&mut members[*index].feedback, "install row access policy", &message);
            }
            return Ok(members.into_iter().map(|m| m.feedback).collect());
        }
    }

    // Leftovers of earlier runs on this table's prefix.
    match ctx
        .repo()
        .get_policies_like(PolicyKind::RowAccess, database, schema, &stem)
        .await
    {
        Ok(stale) => {
            for policy in stale {
                let full_name = format!("{}.{}.{}", policy.database, policy.schema, policy.name);
                if created.contains(&full_name) || !is_generated_from(&stem, &policy.name) {
                    continue;
                }
                match drop_filter_by_name(ctx, &full_name).await {
                    Ok(()) => {}
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        let message = err.to_string();
                        for index in &included {
                            fail_member(
                                &mut members[*index].feedback,
                                "drop stale row access policy",
                                &message,
                            );
                        }
                    }
                }
            }
        }
        Err(err) => tracing::warn!(table = %table_path, error = %err, "could not list row access policies"),
    }

    // Policies recorded on the members that were not recreated.
    for index in &included {
        let member = &mut members[*index];
        let Some(previous) = member.ap.external_id.clone() else {
            continue;
        };
        if created.contains(&previous) {
            continue;
        }
        if let Err(err) = drop_filter_by_name(ctx, &previous).await {
            fail(&mut member.feedback, "drop previous row access policy", err)?;
        }
    }

    Ok(members.into_iter().map(|m| m.feedback).collect())
}

/// Drop a row access policy given as `<db>.<schema>.<name>`, detaching it
/// from whatever table it is attached to. Absent counts as success.
async fn drop_filter_by_name(ctx: &RunContext, full_name: &str) -> Result<(), SyncError> {
    let parts: Vec<&str> = full_name.splitn(3, '.').collect();
    let [database, schema, name] = parts.as_slice() else {
        return Err(SyncError::invalid(format!(
            "'{}' is not a row access policy name",
            full_name
        )));
    };

    let table = match ctx.repo().get_policy_references(database, schema, name).await {
        Ok(references) => references
            .first()
            .map(|r| r.table.clone())
            .unwrap_or_default(),
        Err(err) if err.is_does_not_exist() => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    match ctx.repo().drop_filter(database, schema, &table, name).await {
        Ok(()) => {
            tracing::info!(policy = full_name, "dropped row access policy");
            Ok(())
        }
        Err(err) if err.is_does_not_exist() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn remove_filter(
    ctx: &mut RunContext,
    mutation: &Mutation,
    created: &BTreeSet<String>,
) -> Result<AccessProviderFeedback, SyncError> {
    let ap = &mutation.access_provider;
    let mut feedback = filter_feedback(ap);
    let Some(external_id) = ap.external_id.as_deref() else {
        tracing::warn!(access_provider = %ap.id, "filter delete without external id, nothing to do");
        return Ok(AccessProviderFeedback::new(&ap.id));
    };
    feedback.external_id = Some(external_id.to_string());
    feedback.actual_name = external_id
        .rsplit('.')
        .next()
        .unwrap_or(external_id)
        .to_string();

    if created.contains(external_id) {
        tracing::debug!(access_provider = %ap.id, "policy was just recreated for other filters, keeping it");
        return Ok(feedback);
    }
    if let Err(err) = drop_filter_by_name(ctx, external_id).await {
        fail(&mut feedback, "drop row access policy", err)?;
    }
    Ok(feedback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::feedback::CollectingFeedbackSink;
    use apsync_core::{
        AccessProviderKind, DataObjectReference, FilterExpression, SyncConfig, WhatItem,
    };
    use apsync_repository::{ColumnEntity, MemoryRepository};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn filter_ap(id: &str, table: &str, rule: &str, users: &[&str]) -> AccessProvider {
        let mut ap = AccessProvider::new(id, id, AccessProviderKind::Filtered);
        ap.policy_rule = Some(rule.to_string());
        ap.who.users = users.iter().map(|u| u.to_string()).collect();
        ap.what.push(WhatItem {
            data_object: DataObjectReference::new(table, "table"),
            permissions: Vec::new(),
        });
        ap
    }

    fn seeded() -> Arc<MemoryRepository> {
        let repo = MemoryRepository::new();
        repo.add_column("DB", "S", "ORDERS", ColumnEntity::new("STATE", "VARCHAR(2)"));
        repo.add_column("DB", "S", "ORDERS", ColumnEntity::new("AMOUNT", "NUMBER(38,0)"));
        Arc::new(repo)
    }

    async fn run(repo: Arc<MemoryRepository>, aps: Vec<AccessProvider>) -> CollectingFeedbackSink {
        let mut ctx = RunContext::new(repo, SyncConfig::default()).unwrap();
        let classification = classify(&mut ctx, aps).await.unwrap();
        let sink = CollectingFeedbackSink::new();
        apply_filters(&mut ctx, &classification, &sink).await.unwrap();
        sink
    }

    #[test]
    fn test_legacy_rule() {
        let rendered = render_legacy_rule("{state} = 'NJ'").unwrap();
        assert_eq!(rendered.sql, "state = 'NJ'");
        assert_eq!(rendered.arguments, vec!["state"]);
    }

    #[test]
    fn test_structured_rule() {
        let expression = FilterExpression::compare(
            ComparisonOperator::GreaterThanOrEqual,
            FilterExpression::literal(Literal::Int(100)),
            FilterExpression::column(ReferenceEntityType::DataObjectById, "DB.S.ORDERS.AMOUNT"),
        );
        let mut visitor = SqlFilterVisitor::default();
        assert_eq!(expression.accept(&mut visitor).unwrap(), "(100 >= AMOUNT)");
        assert_eq!(visitor.into_arguments(), vec!["AMOUNT"]);

        let not = FilterExpression::Not(Box::new(FilterExpression::literal(Literal::String(
            "it's".to_string(),
        ))));
        assert_eq!(
            not.accept(&mut SqlFilterVisitor::default()).unwrap(),
            "(NOT 'it''s')"
        );

        let empty = FilterExpression::Aggregator(apsync_core::Aggregator {
            operator: AggregatorOperator::And,
            operands: Vec::new(),
        });
        assert_eq!(
            empty.accept(&mut SqlFilterVisitor::default()),
            Err(FilterError::EmptyAggregator)
        );
    }

    #[test]
    fn test_both_criteria_rejected() {
        let mut ap = filter_ap("f", "DB.S.ORDERS", "{STATE} = 'NJ'", &[]);
        ap.filter_criteria = Some(FilterExpression::literal(Literal::Bool(true)));
        assert_eq!(render_filter(&ap), Err(FilterError::BothCriteria));
    }

    #[tokio::test]
    async fn test_one_policy_per_table() {
        let repo = seeded();
        let sink = run(
            repo.clone(),
            vec![
                filter_ap("nj", "DB.S.ORDERS", "{STATE} = 'NJ'", &["alice"]),
                filter_ap("big", "DB.S.ORDERS", "{AMOUNT} > 1000", &["bob"]),
            ],
        )
        .await;

        let nj = sink.get("nj").unwrap();
        let big = sink.get("big").unwrap();
        assert!(nj.is_success());
        assert_eq!(nj.external_id, big.external_id);
        let external_id = nj.external_id.unwrap();
        assert!(external_id.starts_with("DB.S.APSYNC_FILTER_ORDERS_"));

        let policy = repo.row_access_policy(&external_id).unwrap();
        assert_eq!(
            policy.body,
            "(current_user() IN ('alice') AND (STATE = 'NJ')) OR (current_user() IN ('bob') AND (AMOUNT > 1000))"
        );
        assert_eq!(
            policy.arguments,
            vec![
                ("STATE".to_string(), "VARCHAR".to_string()),
                ("AMOUNT".to_string(), "NUMBER".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let repo = seeded();
        let first = run(
            repo.clone(),
            vec![filter_ap("nj", "DB.S.ORDERS", "{STATE} = 'NJ'", &["alice"])],
        )
        .await;
        let old = first.get("nj").unwrap().external_id.unwrap();

        let mut again = filter_ap("nj", "DB.S.ORDERS", "{STATE} = 'NY'", &["alice"]);
        again.external_id = Some(old.clone());
        let second = run(repo.clone(), vec![again]).await;
        let new = second.get("nj").unwrap().external_id.unwrap();
        assert_ne!(old, new);
        assert_eq!(repo.row_access_policy_names(), vec![new.clone()]);

        let mut gone = filter_ap("nj", "DB.S.ORDERS", "", &[]);
        gone.external_id = Some(new);
        gone.delete = true;
        let third = run(repo.clone(), vec![gone]).await;
        assert!(third.get("nj").unwrap().is_success());
        assert!(repo.row_access_policy_names().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_column_is_an_item_error() {
        let repo = seeded();
        let sink = run(
            repo.clone(),
            vec![filter_ap("x", "DB.S.ORDERS", "{MISSING} = 1", &["alice"])],
        )
        .await;
        assert_eq!(sink.get("x").unwrap().errors.len(), 1);
        assert!(repo.row_access_policy_names().is_empty());
    }
}
