//! [`Repository`] implementation over a [`QueryExecutor`].

use std::collections::BTreeMap;

use apsync_core::{Grant, ObjectKind, RoleId};
use apsync_repository::{
    ColumnEntity, DatabaseEntity, GrantOfRole, GrantToRole, MaskingPolicy, PolicyDescription,
    PolicyEntity, PolicyKind, PolicyReference, RepoError, Repository, RoleEntity,
    RowAccessPolicy, ShareEntity, TableEntity,
};
use async_trait::async_trait;

use crate::executor::{QueryExecutor, Row};
use crate::statements;

pub struct SqlRepository<E> {
    executor: E,
    user_batch_size: usize,
}

impl<E: QueryExecutor> SqlRepository<E> {
    pub fn new(executor: E, user_batch_size: usize) -> Self {
        Self {
            executor,
            user_batch_size: user_batch_size.max(1),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    async fn execute_all(&self, statements: Vec<String>) -> Result<(), RepoError> {
        for sql in statements {
            self.executor.execute(&sql).await?;
        }
        Ok(())
    }

    async fn execute_batched(&self, statements: Vec<String>) -> Result<(), RepoError> {
        for batch in statements.chunks(self.user_batch_size) {
            self.executor.execute_batch(batch).await?;
        }
        Ok(())
    }

    async fn roles_from(&self, sql: &str) -> Result<Vec<RoleEntity>, RepoError> {
        self.executor
            .query(sql)
            .await?
            .iter()
            .map(|row| {
                Ok(RoleEntity {
                    name: row.require("name")?.to_string(),
                    owner: row.get("owner").unwrap_or_default().to_string(),
                    comment: row.get("comment").filter(|c| !c.is_empty()).map(str::to_string),
                })
            })
            .collect()
    }

    async fn names_from(&self, sql: &str) -> Result<Vec<String>, RepoError> {
        self.executor
            .query(sql)
            .await?
            .iter()
            .map(|row| row.require("name").map(str::to_string))
            .collect()
    }

    async fn signatures_from(&self, sql: &str) -> Result<Vec<String>, RepoError> {
        Ok(self
            .executor
            .query(sql)
            .await?
            .iter()
            .filter_map(|row| row.get("arguments").map(signature_of))
            .collect())
    }

    fn policies_from(rows: &[Row], kind: PolicyKind) -> Result<Vec<PolicyEntity>, RepoError> {
        rows.iter()
            .map(|row| {
                Ok(PolicyEntity {
                    name: row.require("name")?.to_string(),
                    database: row.require("database_name")?.to_string(),
                    schema: row.require("schema_name")?.to_string(),
                    kind,
                    owner: row.get("owner").unwrap_or_default().to_string(),
                })
            })
            .collect()
    }
}

/// `MY_FN(VARCHAR) RETURN VARCHAR` becomes `MY_FN(VARCHAR)`.
fn signature_of(arguments: &str) -> String {
    arguments
        .split(" RETURN ")
        .next()
        .unwrap_or(arguments)
        .trim()
        .to_string()
}

/// `DB.S.<TABLE>` becomes `DB.S`.
fn future_container(name: &str) -> &str {
    name.split(".<").next().unwrap_or(name)
}

#[async_trait]
impl<E: QueryExecutor> Repository for SqlRepository<E> {
    async fn create_role(&self, role: &RoleId) -> Result<(), RepoError> {
        self.executor.execute(&statements::create_role(role)?).await
    }

    async fn drop_role(&self, role: &RoleId) -> Result<(), RepoError> {
        self.executor.execute(&statements::drop_role(role)?).await
    }

    async fn rename_role(&self, old: &RoleId, new: &RoleId) -> Result<(), RepoError> {
        self.executor
            .execute(&statements::rename_role(old, new)?)
            .await
    }

    async fn comment_role_if_exists(&self, role: &RoleId, comment: &str) -> Result<(), RepoError> {
        self.executor
            .execute(&statements::comment_role(role, comment)?)
            .await
    }

    async fn grant_users_to_role(&self, role: &RoleId, users: &[String]) -> Result<(), RepoError> {
        let statements = users
            .iter()
            .map(|user| statements::grant_role_to_user(role, user))
            .collect::<Result<Vec<_>, _>>()?;
        self.execute_batched(statements).await
    }

    async fn revoke_users_from_role(
        &self,
        role: &RoleId,
        users: &[String],
    ) -> Result<(), RepoError> {
        let statements = users
            .iter()
            .map(|user| statements::revoke_role_from_user(role, user))
            .collect::<Result<Vec<_>, _>>()?;
        self.execute_batched(statements).await
    }

    async fn grant_role_to_role(&self, role: &RoleId, grantee: &RoleId) -> Result<(), RepoError> {
        self.executor
            .execute(&statements::grant_role_to_role(role, grantee)?)
            .await
    }

    async fn revoke_role_from_role(
        &self,
        role: &RoleId,
        grantee: &RoleId,
    ) -> Result<(), RepoError> {
        self.executor
            .execute(&statements::revoke_role_from_role(role, grantee)?)
            .await
    }

    async fn get_grants_of_role(&self, role: &RoleId) -> Result<Vec<GrantOfRole>, RepoError> {
        self.executor
            .query(&statements::show_grants_of(role)?)
            .await?
            .iter()
            .map(|row| {
                Ok(GrantOfRole::new(
                    row.require("granted_to")?,
                    row.unquoted("grantee_name"),
                ))
            })
            .collect()
    }

    async fn execute_grant_on_role(&self, grant: &Grant, role: &RoleId) -> Result<(), RepoError> {
        self.executor
            .execute(&statements::grant_to_role(grant, role)?)
            .await
    }

    async fn execute_revoke_on_role(&self, grant: &Grant, role: &RoleId) -> Result<(), RepoError> {
        self.executor
            .execute(&statements::revoke_from_role(grant, role)?)
            .await
    }

    async fn get_grants_to_role(&self, role: &RoleId) -> Result<Vec<GrantToRole>, RepoError> {
        self.executor
            .query(&statements::show_grants_to(role)?)
            .await?
            .iter()
            .map(|row| {
                Ok(GrantToRole::new(
                    row.require("privilege")?,
                    row.require("granted_on")?,
                    row.unquoted("name"),
                ))
            })
            .collect()
    }

    async fn get_future_grants_to_role(&self, role: &RoleId) -> Result<Vec<Grant>, RepoError> {
        let rows = self
            .executor
            .query(&statements::show_future_grants_to(role)?)
            .await?;
        let mut grants = Vec::new();
        for row in &rows {
            let kind = match row.require("grant_on")?.to_ascii_uppercase().as_str() {
                "TABLE" => ObjectKind::FutureTables,
                "VIEW" => ObjectKind::FutureViews,
                other => {
                    tracing::debug!(kind = other, "ignoring future grant kind");
                    continue;
                }
            };
            let name = row.unquoted("name");
            grants.push(Grant::new(
                row.require("privilege")?,
                kind,
                future_container(&name),
            ));
        }
        Ok(grants)
    }

    async fn get_account_roles_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<RoleEntity>, RepoError> {
        self.roles_from(&statements::show_roles_like(prefix)).await
    }

    async fn get_database_roles(&self, database: &str) -> Result<Vec<RoleEntity>, RepoError> {
        self.roles_from(&statements::show_database_roles(database)?)
            .await
    }

    async fn get_applications(&self) -> Result<Vec<String>, RepoError> {
        self.names_from("SHOW APPLICATIONS").await
    }

    async fn get_application_roles(
        &self,
        application: &str,
    ) -> Result<Vec<RoleEntity>, RepoError> {
        self.roles_from(&statements::show_application_roles(application)?)
            .await
    }

    async fn get_databases(&self) -> Result<Vec<DatabaseEntity>, RepoError> {
        self.executor
            .query("SHOW DATABASES")
            .await?
            .iter()
            .map(|row| {
                Ok(DatabaseEntity {
                    name: row.require("name")?.to_string(),
                    origin: row.get("origin").filter(|o| !o.is_empty()).map(str::to_string),
                })
            })
            .collect()
    }

    async fn get_inbound_shares(&self) -> Result<Vec<ShareEntity>, RepoError> {
        let rows = self.executor.query("SHOW SHARES").await?;
        let mut shares = Vec::new();
        for row in &rows {
            if !row
                .get("kind")
                .is_some_and(|k| k.eq_ignore_ascii_case("INBOUND"))
            {
                continue;
            }
            shares.push(ShareEntity {
                name: row.require("name")?.to_string(),
                database_name: row
                    .get("database_name")
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
            });
        }
        Ok(shares)
    }

    async fn get_schemas_in_database(&self, database: &str) -> Result<Vec<String>, RepoError> {
        self.names_from(&statements::show_schemas(database)?).await
    }

    async fn get_tables_in_schema(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableEntity>, RepoError> {
        let rows = self
            .executor
            .query(&statements::show_objects(database, schema)?)
            .await?;
        let mut tables = Vec::new();
        for row in &rows {
            let kind = ObjectKind::from_granted_on(row.get("kind").unwrap_or("TABLE"));
            if kind.is_table_like() {
                tables.push(TableEntity::new(row.require("name")?, kind));
            }
        }
        Ok(tables)
    }

    async fn get_columns_in_table(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnEntity>, RepoError> {
        self.executor
            .query(&statements::select_columns(database, schema, table)?)
            .await?
            .iter()
            .map(|row| {
                Ok(ColumnEntity::new(
                    row.require("column_name")?,
                    row.require("data_type")?,
                ))
            })
            .collect()
    }

    async fn get_functions_in_schema(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, RepoError> {
        self.signatures_from(&statements::show_functions(database, schema)?)
            .await
    }

    async fn get_procedures_in_schema(
        &self,
        database: &str,
        schema: &str,
    ) -> Result<Vec<String>, RepoError> {
        self.signatures_from(&statements::show_procedures(database, schema)?)
            .await
    }

    async fn get_warehouses(&self) -> Result<Vec<String>, RepoError> {
        self.names_from("SHOW WAREHOUSES").await
    }

    async fn get_integrations(&self) -> Result<Vec<String>, RepoError> {
        self.names_from("SHOW INTEGRATIONS").await
    }

    async fn get_shares_with_prefix(&self, prefix: &str) -> Result<Vec<String>, RepoError> {
        let rows = self
            .executor
            .query(&statements::show_shares_like(prefix))
            .await?;
        Ok(rows
            .iter()
            .filter(|row| {
                row.get("kind")
                    .is_none_or(|k| k.eq_ignore_ascii_case("OUTBOUND"))
            })
            .filter_map(|row| row.get("name"))
            // Outbound share names are reported as `<account>.<share>`.
            .map(|name| name.rsplit('.').next().unwrap_or(name).to_string())
            .collect())
    }

    async fn create_share(&self, name: &str) -> Result<(), RepoError> {
        self.executor.execute(&statements::create_share(name)?).await
    }

    async fn drop_share(&self, name: &str) -> Result<(), RepoError> {
        self.executor.execute(&statements::drop_share(name)?).await
    }

    async fn set_share_accounts(&self, name: &str, accounts: &[String]) -> Result<(), RepoError> {
        self.executor
            .execute(&statements::set_share_accounts(name, accounts)?)
            .await
    }

    async fn execute_grant_on_share(&self, grant: &Grant, share: &str) -> Result<(), RepoError> {
        self.executor
            .execute(&statements::grant_to_share(grant, share)?)
            .await
    }

    async fn execute_revoke_on_share(&self, grant: &Grant, share: &str) -> Result<(), RepoError> {
        self.executor
            .execute(&statements::revoke_from_share(grant, share)?)
            .await
    }

    async fn create_masking_policy(&self, policy: &MaskingPolicy) -> Result<(), RepoError> {
        self.execute_all(statements::create_masking_policy(policy)?)
            .await
    }

    async fn drop_masking_policy(
        &self,
        database: &str,
        schema: &str,
        name: &str,
    ) -> Result<(), RepoError> {
        let references = self.get_policy_references(database, schema, name).await?;
        let mut sql = Vec::new();
        for reference in references {
            if let Some(column) = &reference.column {
                sql.push(statements::unset_masking_policy(
                    &reference.database,
                    &reference.schema,
                    &reference.table,
                    column,
                )?);
            }
        }
        sql.push(statements::drop_policy(
            PolicyKind::Masking,
            database,
            schema,
            name,
        )?);
        self.execute_all(sql).await
    }

    async fn update_filter(&self, policy: &RowAccessPolicy) -> Result<(), RepoError> {
        self.execute_all(statements::update_filter(policy)?).await
    }

    async fn drop_filter(
        &self,
        database: &str,
        schema: &str,
        table: &str,
        name: &str,
    ) -> Result<(), RepoError> {
        let detached = if table.is_empty() {
            Ok(())
        } else {
            self.executor
                .execute(&statements::detach_filter(database, schema, table, name)?)
                .await
        };
        match detached {
            Ok(()) => {}
            // The table may already be gone; the policy itself still needs dropping.
            Err(err) if err.is_does_not_exist() => {
                tracing::debug!(table, policy = name, "table missing while detaching filter");
            }
            Err(err) => return Err(err),
        }
        self.executor
            .execute(&statements::drop_policy(
                PolicyKind::RowAccess,
                database,
                schema,
                name,
            )?)
            .await
    }

    async fn describe_policy(
        &self,
        kind: PolicyKind,
        database: &str,
        schema: &str,
        name: &str,
    ) -> Result<PolicyDescription, RepoError> {
        let rows = self
            .executor
            .query(&statements::describe_policy(kind, database, schema, name)?)
            .await?;
        let row = rows.first().ok_or_else(|| {
            RepoError::does_not_exist(format!(
                "{} {}.{}.{}",
                kind.sql_keyword(),
                database,
                schema,
                name
            ))
        })?;
        Ok(PolicyDescription {
            name: row.get("name").unwrap_or(name).to_string(),
            signature: row.get("signature").unwrap_or_default().to_string(),
            return_type: row.get("return_type").unwrap_or_default().to_string(),
            body: row.require("body")?.to_string(),
        })
    }

    async fn get_policy_references(
        &self,
        database: &str,
        schema: &str,
        name: &str,
    ) -> Result<Vec<PolicyReference>, RepoError> {
        self.executor
            .query(&statements::select_policy_references(database, schema, name)?)
            .await?
            .iter()
            .map(|row| {
                Ok(PolicyReference {
                    database: row.require("ref_database_name")?.to_string(),
                    schema: row.require("ref_schema_name")?.to_string(),
                    table: row.require("ref_entity_name")?.to_string(),
                    column: row
                        .get("ref_column_name")
                        .filter(|c| !c.is_empty())
                        .map(str::to_string),
                    status: row.get("policy_status").unwrap_or("ACTIVE").to_string(),
                })
            })
            .collect()
    }

    async fn get_policies(
        &self,
        kind: PolicyKind,
        database: &str,
    ) -> Result<Vec<PolicyEntity>, RepoError> {
        let rows = self
            .executor
            .query(&statements::show_policies(kind, database)?)
            .await?;
        Self::policies_from(&rows, kind)
    }

    async fn get_policies_like(
        &self,
        kind: PolicyKind,
        database: &str,
        schema: &str,
        prefix: &str,
    ) -> Result<Vec<PolicyEntity>, RepoError> {
        let rows = self
            .executor
            .query(&statements::show_policies_like(kind, database, schema, prefix)?)
            .await?;
        Self::policies_from(&rows, kind)
    }

    async fn get_role_tags(&self, role: &RoleId) -> Result<BTreeMap<String, String>, RepoError> {
        self.executor
            .query(&statements::select_role_tags(role))
            .await?
            .iter()
            .map(|row| {
                Ok((
                    format!(
                        "{}.{}.{}",
                        row.require("tag_database")?,
                        row.require("tag_schema")?,
                        row.require("tag_name")?
                    ),
                    row.get("tag_value").unwrap_or_default().to_string(),
                ))
            })
            .collect()
    }

    async fn set_role_tags(
        &self,
        role: &RoleId,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), RepoError> {
        match statements::set_role_tags(role, tags)? {
            Some(sql) => self.executor.execute(&sql).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        statements: Mutex<Vec<String>>,
        batches: Mutex<Vec<usize>>,
        results: Vec<(String, Vec<Row>)>,
    }

    impl RecordingExecutor {
        fn with_result(mut self, prefix: &str, rows: Vec<Row>) -> Self {
            self.results.push((prefix.to_string(), rows));
            self
        }

        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryExecutor for RecordingExecutor {
        async fn execute(&self, sql: &str) -> Result<(), RepoError> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(())
        }

        async fn execute_batch(&self, statements: &[String]) -> Result<(), RepoError> {
            self.batches.lock().unwrap().push(statements.len());
            self.statements
                .lock()
                .unwrap()
                .extend(statements.iter().cloned());
            Ok(())
        }

        async fn query(&self, sql: &str) -> Result<Vec<Row>, RepoError> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(self
                .results
                .iter()
                .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
                .map(|(_, rows)| rows.clone())
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_user_grants_are_batched() {
        let repo = SqlRepository::new(RecordingExecutor::default(), 2);
        let users: Vec<String> = ["a", "b", "c"].iter().map(|u| u.to_string()).collect();

        repo.grant_users_to_role(&RoleId::account("AP1"), &users)
            .await
            .unwrap();

        assert_eq!(*repo.executor().batches.lock().unwrap(), vec![2, 1]);
        assert_eq!(
            repo.executor().statements(),
            vec![
                "GRANT ROLE \"AP1\" TO USER \"a\"",
                "GRANT ROLE \"AP1\" TO USER \"b\"",
                "GRANT ROLE \"AP1\" TO USER \"c\"",
            ]
        );
    }

    #[tokio::test]
    async fn test_future_grants_are_parsed() {
        let executor = RecordingExecutor::default().with_result(
            "SHOW FUTURE GRANTS",
            vec![
                Row::from_pairs([
                    ("privilege", "SELECT"),
                    ("grant_on", "TABLE"),
                    ("name", "DB.S.<TABLE>"),
                ]),
                Row::from_pairs([
                    ("privilege", "USAGE"),
                    ("grant_on", "SCHEMA"),
                    ("name", "DB.<SCHEMA>"),
                ]),
            ],
        );
        let repo = SqlRepository::new(executor, 200);

        let grants = repo
            .get_future_grants_to_role(&RoleId::account("AP1"))
            .await
            .unwrap();

        assert_eq!(
            grants,
            vec![Grant::new("SELECT", ObjectKind::FutureTables, "DB.S")]
        );
    }

    #[tokio::test]
    async fn test_inbound_shares_only() {
        let executor = RecordingExecutor::default().with_result(
            "SHOW SHARES",
            vec![
                Row::from_pairs([("kind", "INBOUND"), ("name", "PROV.SH"), ("database_name", "SHARED_DB")]),
                Row::from_pairs([("kind", "OUTBOUND"), ("name", "ME.OUT")]),
            ],
        );
        let repo = SqlRepository::new(executor, 200);

        let shares = repo.get_inbound_shares().await.unwrap();

        assert_eq!(
            shares,
            vec![ShareEntity {
                name: "PROV.SH".to_string(),
                database_name: Some("SHARED_DB".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_drop_masking_policy_unsets_columns_first() {
        let executor = RecordingExecutor::default().with_result(
            "SELECT * FROM TABLE",
            vec![Row::from_pairs([
                ("ref_database_name", "DB"),
                ("ref_schema_name", "S"),
                ("ref_entity_name", "T"),
                ("ref_column_name", "EMAIL"),
            ])],
        );
        let repo = SqlRepository::new(executor, 200);

        repo.drop_masking_policy("DB", "S", "M").await.unwrap();

        let statements = repo.executor().statements();
        assert_eq!(
            &statements[1..],
            &[
                "ALTER TABLE \"DB\".\"S\".\"T\" MODIFY COLUMN \"EMAIL\" UNSET MASKING POLICY".to_string(),
                "DROP MASKING POLICY \"DB\".\"S\".\"M\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_signature_of() {
        assert_eq!(signature_of("MY_FN(VARCHAR) RETURN VARCHAR"), "MY_FN(VARCHAR)");
        assert_eq!(future_container("DB.<TABLE>"), "DB");
    }
}
