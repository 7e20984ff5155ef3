//! Statement execution.

use std::collections::BTreeMap;

use apsync_repository::RepoError;
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Row as _};

/// A result row, keyed by lowercase column name. NULLs are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: BTreeMap<String, String>,
}

impl Row {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .get(&column.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Value of a column that must be present.
    pub fn require(&self, column: &str) -> Result<&str, RepoError> {
        self.get(column).ok_or_else(|| {
            RepoError::Internal(anyhow::anyhow!("result row is missing column '{}'", column))
        })
    }

    /// Value with identifier quotes removed, empty when absent.
    pub fn unquoted(&self, column: &str) -> String {
        self.get(column).unwrap_or_default().replace('"', "")
    }
}

/// Runs statements against the warehouse.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a statement that returns no rows.
    async fn execute(&self, sql: &str) -> Result<(), RepoError>;

    /// Run several statements in one round trip.
    async fn execute_batch(&self, statements: &[String]) -> Result<(), RepoError> {
        for sql in statements {
            self.execute(sql).await?;
        }
        Ok(())
    }

    /// Run a listing statement.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, RepoError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SqlxExecutorOptions {
    pub max_connections: u32,
    pub max_result_rows: usize,
}

impl Default for SqlxExecutorOptions {
    fn default() -> Self {
        Self {
            max_connections: 1,
            max_result_rows: 10_000,
        }
    }
}

/// Executor over a sqlx Postgres-protocol pool.
pub struct SqlxExecutor {
    pool: sqlx::PgPool,
    options: SqlxExecutorOptions,
}

impl SqlxExecutor {
    pub async fn connect(
        database_url: &str,
        options: SqlxExecutorOptions,
    ) -> Result<Self, RepoError> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .connect(database_url)
            .await
            .map_err(|e| RepoError::Connection(e.to_string()))?;
        Ok(Self { pool, options })
    }
}

#[async_trait]
impl QueryExecutor for SqlxExecutor {
    async fn execute(&self, sql: &str) -> Result<(), RepoError> {
        tracing::debug!(statement = sql, "executing");
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| classify_error(sql, e))?;
        Ok(())
    }

    async fn execute_batch(&self, statements: &[String]) -> Result<(), RepoError> {
        if statements.is_empty() {
            return Ok(());
        }
        let sql = statements.join(";\n");
        tracing::debug!(statements = statements.len(), "executing batch");
        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| classify_error(&sql, e))?;
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, RepoError> {
        tracing::debug!(statement = sql, "querying");
        let rows = sqlx::raw_sql(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_error(sql, e))?;

        if rows.len() > self.options.max_result_rows {
            return Err(RepoError::RowLimitExceeded {
                limit: self.options.max_result_rows,
                statement: sql.to_string(),
            });
        }

        Ok(rows.iter().map(convert_row).collect())
    }
}

fn convert_row(row: &PgRow) -> Row {
    let mut values = BTreeMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            v
        } else if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            v.map(|n| n.to_string())
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            v.map(|b| b.to_string())
        } else {
            None
        };
        if let Some(value) = value {
            values.insert(column.name().to_ascii_lowercase(), value);
        }
    }
    Row { values }
}

fn classify_error(sql: &str, err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            if message.to_ascii_lowercase().contains("does not exist") {
                RepoError::DoesNotExist { object: message }
            } else if message.to_ascii_lowercase().contains("already exists") {
                RepoError::AlreadyExists { object: message }
            } else {
                RepoError::Statement {
                    statement: sql.to_string(),
                    message,
                }
            }
        }
        sqlx::Error::Io(e) => RepoError::Connection(e.to_string()),
        other @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) => {
            RepoError::Connection(other.to_string())
        }
        other => RepoError::Statement {
            statement: sql.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let row = Row::from_pairs([("NAME", "\"AP1\""), ("owner", "SYSADMIN")]);
        assert_eq!(row.get("name"), Some("\"AP1\""));
        assert_eq!(row.unquoted("name"), "AP1");
        assert_eq!(row.get("Owner"), Some("SYSADMIN"));
        assert!(row.require("comment").is_err());
    }
}
