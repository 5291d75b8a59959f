use crate::refinement::AttemptFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How an execution failure should be handled by the refinement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionErrorKind {
    /// Timeouts, dropped connections, pool exhaustion, serialization conflicts.
    Transient,
    /// The store rejected the statement itself (unknown column, bad cast, ...).
    Permanent,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionErrorKind::Transient => write!(f, "Transient"),
            ExecutionErrorKind::Permanent => write!(f, "Permanent"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} execution error: {message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ExecutionErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ExecutionErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ExecutionErrorKind::Transient
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("SQL generation failed: {0}")]
pub struct GenerationError(pub String);

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Schema unavailable for dataset {dataset_id}: {reason}")]
    SchemaUnavailable { dataset_id: i64, reason: String },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("No acceptable query after {attempts} attempts; last failure: {last}")]
    GenerationExhausted { attempts: u32, last: AttemptFailure },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audit persistence error: {0}")]
    Audit(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Stable identifier of the error class, for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::SchemaUnavailable { .. } => "SchemaUnavailable",
            GatewayError::Generation(_) => "GenerationError",
            GatewayError::Execution(_) => "ExecutionError",
            GatewayError::GenerationExhausted { .. } => "GenerationExhausted",
            GatewayError::InvalidRequest(_) => "InvalidRequest",
            GatewayError::Config(_) => "ConfigError",
            GatewayError::Audit(_) => "AuditError",
            GatewayError::Database(_) => "DatabaseError",
            GatewayError::Json(_) => "JsonError",
        }
    }

    /// Message safe to show to the person who asked the question.
    ///
    /// Never includes connection details or raw database error text; the full
    /// `Display` output is reserved for the audit record and logs.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::SchemaUnavailable { .. } => {
                "The dataset schema is currently unavailable. Please try again later.".to_string()
            }
            GatewayError::Generation(_) => {
                "The query generator is currently unavailable. Please try again later.".to_string()
            }
            GatewayError::Execution(e) => match e.kind {
                ExecutionErrorKind::Transient => {
                    "The query could not be completed in time. Please try again or narrow your question."
                        .to_string()
                }
                ExecutionErrorKind::Permanent => {
                    "The query could not be executed against this dataset.".to_string()
                }
            },
            GatewayError::GenerationExhausted { attempts, last } => format!(
                "Could not produce a safe query for this question after {} attempts (last issue: {}). Try rephrasing it.",
                attempts,
                last.label()
            ),
            GatewayError::InvalidRequest(msg) => msg.clone(),
            GatewayError::Config(_)
            | GatewayError::Audit(_)
            | GatewayError::Database(_)
            | GatewayError::Json(_) => "An internal error occurred while processing the question.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
