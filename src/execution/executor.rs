//! Query Executor
//!
//! Runs an accepted statement inside a read-only transaction that is always
//! rolled back. The statement is bounded twice: `SET LOCAL statement_timeout`
//! on the server and a client-side timeout around the whole call. The
//! transaction's `search_path` holds only the system catalog, so a bare
//! relation name can never resolve into another schema.

use crate::error::ExecutionError;
use crate::execution::error_classifier::ErrorClassifier;
use crate::execution::result::{unique_column_names, ColumnMeta, ColumnType, ExecutionResult};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Column, Executor, PgPool, Row, Statement, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Client-side slack on top of the server statement timeout, so the server
/// cancellation (57014) normally wins and is reported with its SQLSTATE.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(2);

/// Execution boundary to the relational store.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn execute(&self, sanitized_sql: &str, timeout: Duration) -> Result<ExecutionResult, ExecutionError>;
}

pub struct PgQueryExecutor {
    pool: PgPool,
    max_rows: usize,
    classifier: ErrorClassifier,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool, max_rows: usize) -> Self {
        Self {
            pool,
            max_rows,
            classifier: ErrorClassifier::new(),
        }
    }

    /// Each row comes back as one JSON object so column order and values
    /// survive without per-type decoding. The derived column list renames
    /// the output to `column_names`, which are distinct, so duplicate names
    /// from joins do not collapse into one key. The outer LIMIT is a
    /// backstop for the cap the validator already applied.
    fn wrap(&self, sanitized_sql: &str, column_names: &[String]) -> String {
        let column_list = if column_names.is_empty() {
            String::new()
        } else {
            let quoted: Vec<String> = column_names
                .iter()
                .map(|name| format!("\"{}\"", name.replace('"', "\"\"")))
                .collect();
            format!("({})", quoted.join(", "))
        };
        format!(
            "SELECT to_json(bounded) AS record_json FROM ({}) AS bounded{} LIMIT {}",
            strip_terminator(sanitized_sql),
            column_list,
            self.max_rows + 1
        )
    }

    async fn run_read_only(
        &self,
        sanitized_sql: &str,
        timeout: Duration,
    ) -> Result<(Vec<ColumnMeta>, Vec<Value>), sqlx::Error> {
        // Dropping the transaction on cancellation rolls it back and returns
        // the connection to the pool.
        let mut tx = self.pool.begin().await?;

        let outcome: Result<(Vec<ColumnMeta>, Vec<Value>), sqlx::Error> = async {
            sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
            sqlx::query(&format!("SET LOCAL statement_timeout = {}", timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
            sqlx::query("SET LOCAL search_path = pg_catalog, pg_temp")
                .execute(&mut *tx)
                .await?;

            // Column metadata comes from the prepared statement so an empty
            // result still describes its columns.
            let inner = strip_terminator(sanitized_sql);
            let prepared = (&mut *tx).prepare(inner).await?;
            let names = unique_column_names(prepared.columns().iter().map(|c| c.name().to_string()));
            let columns: Vec<ColumnMeta> = names
                .iter()
                .zip(prepared.columns())
                .map(|(name, column)| ColumnMeta {
                    name: name.clone(),
                    column_type: ColumnType::from_pg_type(column.type_info().name()),
                })
                .collect();

            let wrapped = self.wrap(inner, &names);
            let rows = sqlx::query(&wrapped).persistent(false).fetch_all(&mut *tx).await?;
            let rows = rows
                .iter()
                .map(|row| row.try_get::<Value, _>("record_json"))
                .collect::<Result<Vec<Value>, sqlx::Error>>()?;
            Ok((columns, rows))
        }
        .await;

        if let Err(e) = tx.rollback().await {
            warn!("Rollback of read-only transaction failed: {}", e);
        }
        outcome
    }
}

#[async_trait]
impl QueryRunner for PgQueryExecutor {
    async fn execute(&self, sanitized_sql: &str, timeout: Duration) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        debug!("Executing with {} ms timeout", timeout.as_millis());

        match tokio::time::timeout(timeout + CLIENT_TIMEOUT_GRACE, self.run_read_only(sanitized_sql, timeout)).await {
            Ok(Ok((columns, rows))) => {
                let result = ExecutionResult::with_columns(columns, rows, self.max_rows, started.elapsed());
                info!(
                    "Query returned {} rows in {} ms{}",
                    result.row_count,
                    result.elapsed_ms,
                    if result.truncated { " (truncated)" } else { "" }
                );
                Ok(result)
            }
            Ok(Err(e)) => {
                let error = self.classifier.classify(&e);
                warn!("Query failed ({}): {}", error.kind, error.message);
                Err(error)
            }
            Err(_) => {
                warn!("Query exceeded client timeout of {:?}", timeout + CLIENT_TIMEOUT_GRACE);
                Err(ExecutionError::transient(format!(
                    "statement exceeded the {} ms timeout",
                    timeout.as_millis()
                )))
            }
        }
    }
}

fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn executor(max_rows: usize) -> PgQueryExecutor {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        PgQueryExecutor::new(pool, max_rows)
    }

    #[tokio::test]
    async fn test_wrap_strips_terminator_and_adds_backstop() {
        let wrapped = executor(100).wrap("SELECT name FROM sales_data.products LIMIT 100;", &["name".to_string()]);
        assert_eq!(
            wrapped,
            "SELECT to_json(bounded) AS record_json FROM (SELECT name FROM sales_data.products LIMIT 100) AS bounded(\"name\") LIMIT 101"
        );
    }

    #[tokio::test]
    async fn test_wrap_renames_duplicate_join_columns() {
        let sql = "SELECT p.product_id, s.product_id FROM sales_data.products p \
                   JOIN sales_data.sales s ON s.product_id = p.product_id LIMIT 10";
        let names = unique_column_names(vec!["product_id".to_string(), "product_id".to_string()]);
        let wrapped = executor(10).wrap(sql, &names);
        assert!(wrapped.ends_with("AS bounded(\"product_id\", \"product_id_2\") LIMIT 11"));
    }

    #[tokio::test]
    async fn test_wrap_without_columns_has_no_column_list() {
        let wrapped = executor(5).wrap("SELECT FROM sales_data.products LIMIT 5", &[]);
        assert!(wrapped.ends_with("AS bounded LIMIT 6"));
    }
}
