//! Schema introspection against PostgreSQL `information_schema` / `pg_class`.

use crate::error::{GatewayError, Result};
use crate::schema::catalog::SchemaSource;
use crate::schema::snapshot::{ColumnShape, SchemaSnapshot, TableShape};
use crate::scope::DatasetScope;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, sqlx::FromRow)]
struct ColumnRow {
    table_name: String,
    column_name: String,
    data_type: String,
    is_nullable: String,
}

#[derive(Debug, sqlx::FromRow)]
struct RowEstimate {
    table_name: String,
    estimate: i64,
}

pub struct PgSchemaSource {
    pool: PgPool,
}

impl PgSchemaSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_columns(&self, scope: &DatasetScope) -> std::result::Result<Vec<ColumnRow>, sqlx::Error> {
        // information_schema columns are domain types; cast to text for decoding.
        sqlx::query_as::<_, ColumnRow>(
            r#"
            SELECT
                c.table_name::text AS table_name,
                c.column_name::text AS column_name,
                c.data_type::text AS data_type,
                c.is_nullable::text AS is_nullable
            FROM information_schema.columns c
            JOIN information_schema.tables t
              ON t.table_schema = c.table_schema
             AND t.table_name = c.table_name
            WHERE c.table_schema = $1
              AND c.table_name = ANY($2)
              AND t.table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY c.table_name, c.ordinal_position
            "#,
        )
        .bind(&scope.schema_name)
        .bind(&scope.permitted_tables)
        .fetch_all(&self.pool)
        .await
    }

    async fn load_row_estimates(&self, scope: &DatasetScope) -> std::result::Result<Vec<RowEstimate>, sqlx::Error> {
        sqlx::query_as::<_, RowEstimate>(
            r#"
            SELECT c.relname::text AS table_name,
                   GREATEST(c.reltuples, 0)::bigint AS estimate
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1
              AND c.relname = ANY($2)
            "#,
        )
        .bind(&scope.schema_name)
        .bind(&scope.permitted_tables)
        .fetch_all(&self.pool)
        .await
    }
}

#[async_trait]
impl SchemaSource for PgSchemaSource {
    async fn introspect(&self, scope: &DatasetScope) -> Result<SchemaSnapshot> {
        let unavailable = |e: sqlx::Error| GatewayError::SchemaUnavailable {
            dataset_id: scope.dataset_id,
            reason: e.to_string(),
        };

        let columns = self.load_columns(scope).await.map_err(unavailable)?;
        let estimates: HashMap<String, i64> = self
            .load_row_estimates(scope)
            .await
            .map_err(unavailable)?
            .into_iter()
            .map(|r| (r.table_name, r.estimate))
            .collect();

        let tables = group_columns(columns, &estimates);
        debug!(
            "Introspected {} tables in schema {}",
            tables.len(),
            scope.schema_name
        );

        Ok(SchemaSnapshot::new(
            scope.dataset_id,
            scope.dataset_name.clone(),
            scope.schema_name.clone(),
            tables,
        ))
    }
}

/// Rows arrive ordered by table then ordinal position; fold them into tables.
fn group_columns(rows: Vec<ColumnRow>, estimates: &HashMap<String, i64>) -> Vec<TableShape> {
    let mut tables: Vec<TableShape> = Vec::new();
    for row in rows {
        let needs_new = tables.last().map(|t| t.name != row.table_name).unwrap_or(true);
        if needs_new {
            let estimate = estimates.get(&row.table_name).copied().unwrap_or(0);
            tables.push(TableShape::new(row.table_name.clone(), estimate));
        }
        if let Some(table) = tables.last_mut() {
            table.columns.push(ColumnShape {
                name: row.column_name,
                data_type: row.data_type,
                nullable: row.is_nullable == "YES",
            });
        }
    }
    tables
}
