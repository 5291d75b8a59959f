//! Query audit log.
//!
//! One record per user request, written after the refinement loop reaches a
//! terminal state. Appends are best-effort: the pipeline logs a failed append
//! and returns its result unchanged.

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Error => "error",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub query_id: Uuid,
    pub user_id: i64,
    pub dataset_id: i64,
    pub question: String,
    /// Final SQL on success, otherwise the last attempted SQL.
    pub generated_sql: Option<String>,
    pub row_count: Option<i64>,
    pub execution_time_ms: Option<i64>,
    pub status: AuditStatus,
    /// Full, unsanitized error text.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one record atomically.
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// Process-local sink; used by tests and by the CLI when no database is wanted.
#[derive(Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| GatewayError::Audit(format!("audit log lock poisoned: {}", e)))?;
        records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_append() {
        let log = InMemoryAuditLog::new();
        let record = AuditRecord {
            query_id: Uuid::new_v4(),
            user_id: 7,
            dataset_id: 1,
            question: "Show me all products".to_string(),
            generated_sql: Some("SELECT * FROM sales_data.products LIMIT 10000".to_string()),
            row_count: Some(3),
            execution_time_ms: Some(12),
            status: AuditStatus::Success,
            error_message: None,
            created_at: Utc::now(),
        };
        log.append(&record).await.unwrap();
        assert_eq!(log.records(), vec![record]);
        assert_eq!(AuditStatus::Error.to_string(), "error");
    }
}
