//! PostgreSQL-backed audit log.

use crate::audit::{AuditRecord, AuditSink};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use sqlx::PgPool;

pub const AUDIT_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS query_audit_log (
    query_id          UUID PRIMARY KEY,
    user_id           BIGINT NOT NULL,
    dataset_id        BIGINT NOT NULL,
    question          TEXT NOT NULL,
    generated_sql     TEXT,
    row_count         BIGINT,
    execution_time_ms BIGINT,
    status            VARCHAR(16) NOT NULL CHECK (status IN ('success', 'error')),
    error_message     TEXT,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const AUDIT_INDEX_DDL: &str =
    "CREATE INDEX IF NOT EXISTS idx_query_audit_log_user_created ON query_audit_log (user_id, created_at DESC)";

pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the audit table and its index if missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(AUDIT_TABLE_DDL).execute(&self.pool).await?;
        sqlx::query(AUDIT_INDEX_DDL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        // A single INSERT: readers see the whole record or none of it.
        sqlx::query(
            r#"
            INSERT INTO query_audit_log
                (query_id, user_id, dataset_id, question, generated_sql,
                 row_count, execution_time_ms, status, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.query_id)
        .bind(record.user_id)
        .bind(record.dataset_id)
        .bind(&record.question)
        .bind(&record.generated_sql)
        .bind(record.row_count)
        .bind(record.execution_time_ms)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Audit(e.to_string()))?;
        Ok(())
    }
}
