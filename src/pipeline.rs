//! Query Gateway
//!
//! Pipeline entry point: question + scope + caller in, `PipelineResult` out.
//! Each call is an independent pipeline; the only shared state is the schema
//! cache and the connection pool behind the runner.

use crate::audit::{AuditRecord, AuditSink, AuditStatus};
use crate::error::{GatewayError, Result};
use crate::execution::ColumnMeta;
use crate::refinement::{AttemptRecord, RefinementLoop, RefinementOutcome, RefinementRun};
use crate::schema::SchemaCatalog;
use crate::scope::{DatasetScope, UserContext};
use crate::validation::{RowCapAdjustment, SqlValidator, ValidationVerdict, ViolationCode};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Success,
    Error,
}

/// User-safe description of why a request failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt: u32,
    pub sql: String,
    pub violation_codes: Vec<ViolationCode>,
    pub failure: Option<String>,
    pub transient_retries: u32,
}

impl From<&AttemptRecord> for AttemptSummary {
    fn from(record: &AttemptRecord) -> Self {
        Self {
            attempt: record.attempt,
            sql: record.last_sql().to_string(),
            violation_codes: record.failure.as_ref().map(|f| f.codes()).unwrap_or_default(),
            failure: record.failure.as_ref().map(|f| f.label()),
            transient_retries: record.transient_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub query_id: Uuid,
    pub status: PipelineStatus,
    pub final_sql: Option<String>,
    pub rows: Vec<serde_json::Value>,
    pub columns: Vec<ColumnMeta>,
    pub row_count: usize,
    /// The row cap may have cut the result short.
    pub truncated: bool,
    pub attempts: Vec<AttemptSummary>,
    pub failure: Option<PipelineFailure>,
    pub elapsed_ms: u64,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }

    fn failed(query_id: Uuid, error: &GatewayError, attempts: Vec<AttemptSummary>, elapsed_ms: u64) -> Self {
        Self {
            query_id,
            status: PipelineStatus::Error,
            final_sql: None,
            rows: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            truncated: false,
            attempts,
            failure: Some(PipelineFailure {
                code: error.code().to_string(),
                message: error.user_message(),
            }),
            elapsed_ms,
        }
    }
}

pub struct QueryGateway {
    catalog: Arc<SchemaCatalog>,
    refinement: RefinementLoop,
    validator: SqlValidator,
    audit: Arc<dyn AuditSink>,
}

impl QueryGateway {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        refinement: RefinementLoop,
        validator: SqlValidator,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            catalog,
            refinement,
            validator,
            audit,
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub async fn ask(&self, question: &str, scope: &DatasetScope, user: &UserContext) -> PipelineResult {
        let query_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            "Query {} from user {} on dataset {}: {}",
            query_id, user.user_id, scope.dataset_id, question
        );

        if question.trim().is_empty() {
            let err = GatewayError::InvalidRequest("Please enter a question.".to_string());
            return self
                .finish_failed(query_id, question, scope, user, &err, None, Vec::new(), started)
                .await;
        }

        let snapshot = match self.catalog.snapshot(scope).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!("Schema unavailable for query {}: {}", query_id, err);
                return self
                    .finish_failed(query_id, question, scope, user, &err, None, Vec::new(), started)
                    .await;
            }
        };

        let run = self.refinement.run(question, scope, &snapshot, user).await;
        self.finish(query_id, question, scope, user, run, started).await
    }

    /// Validate caller-supplied SQL against the scope without executing it.
    pub async fn preview(&self, sql: &str, scope: &DatasetScope) -> Result<ValidationVerdict> {
        let snapshot = self.catalog.snapshot(scope).await?;
        Ok(self.validator.validate_sql(sql, scope, &snapshot))
    }

    async fn finish(
        &self,
        query_id: Uuid,
        question: &str,
        scope: &DatasetScope,
        user: &UserContext,
        run: RefinementRun,
        started: Instant,
    ) -> PipelineResult {
        let attempts: Vec<AttemptSummary> = run.attempts.iter().map(AttemptSummary::from).collect();
        let last_sql = run.last_sql().map(str::to_string);

        match run.outcome {
            RefinementOutcome::Succeeded {
                final_sql,
                row_cap,
                result,
            } => {
                let capped = matches!(
                    row_cap,
                    RowCapAdjustment::Injected { .. } | RowCapAdjustment::Clamped { .. }
                ) && result.row_count as u64 >= row_cap.effective_limit();
                let elapsed_ms = started.elapsed().as_millis() as u64;

                self.record(AuditRecord {
                    query_id,
                    user_id: user.user_id,
                    dataset_id: scope.dataset_id,
                    question: question.to_string(),
                    generated_sql: Some(final_sql.clone()),
                    row_count: Some(result.row_count as i64),
                    execution_time_ms: Some(elapsed_ms as i64),
                    status: AuditStatus::Success,
                    error_message: None,
                    created_at: Utc::now(),
                })
                .await;

                PipelineResult {
                    query_id,
                    status: PipelineStatus::Success,
                    final_sql: Some(final_sql),
                    row_count: result.row_count,
                    truncated: result.truncated || capped,
                    rows: result.rows,
                    columns: result.columns,
                    attempts,
                    failure: None,
                    elapsed_ms,
                }
            }
            RefinementOutcome::ExhaustedFailed { last } => {
                let err = GatewayError::GenerationExhausted {
                    attempts: run.attempts.len() as u32,
                    last,
                };
                self.finish_failed(query_id, question, scope, user, &err, last_sql, attempts, started)
                    .await
            }
            RefinementOutcome::Aborted { error } => {
                self.finish_failed(query_id, question, scope, user, &error, last_sql, attempts, started)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_failed(
        &self,
        query_id: Uuid,
        question: &str,
        scope: &DatasetScope,
        user: &UserContext,
        err: &GatewayError,
        last_sql: Option<String>,
        attempts: Vec<AttemptSummary>,
        started: Instant,
    ) -> PipelineResult {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        warn!("Query {} failed: {}", query_id, err);

        self.record(AuditRecord {
            query_id,
            user_id: user.user_id,
            dataset_id: scope.dataset_id,
            question: question.to_string(),
            generated_sql: last_sql,
            row_count: None,
            execution_time_ms: Some(elapsed_ms as i64),
            status: AuditStatus::Error,
            error_message: Some(err.to_string()),
            created_at: Utc::now(),
        })
        .await;

        PipelineResult::failed(query_id, err, attempts, elapsed_ms)
    }

    /// Best-effort: a failed append is logged and otherwise ignored.
    async fn record(&self, record: AuditRecord) {
        if let Err(e) = self.audit.append(&record).await {
            error!("Failed to persist audit record {}: {}", record.query_id, e);
        }
    }
}
