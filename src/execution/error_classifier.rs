//! Error Classifier
//!
//! Maps store errors onto the Transient / Permanent split the refinement loop
//! acts on. Transient means "the same SQL may succeed if run again";
//! Permanent means the statement itself is wrong for this schema.

use crate::error::{ExecutionError, ExecutionErrorKind};

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, error: &sqlx::Error) -> ExecutionError {
        match error {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.to_string()).unwrap_or_default();
                ExecutionError {
                    kind: self.classify_sqlstate(&code),
                    message: format!("[{}] {}", code, db.message()),
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => ExecutionError::transient(error.to_string()),
            other => ExecutionError::permanent(other.to_string()),
        }
    }

    /// SQLSTATE classes that indicate load, contention or connectivity.
    pub fn classify_sqlstate(&self, code: &str) -> ExecutionErrorKind {
        match code {
            // query_canceled (statement_timeout), serialization_failure,
            // deadlock_detected, lock_not_available
            "57014" | "40001" | "40P01" | "55P03" => ExecutionErrorKind::Transient,
            // admin/crash shutdown, connection exceptions, insufficient resources
            c if c.starts_with("57P") || c.starts_with("08") || c.starts_with("53") => {
                ExecutionErrorKind::Transient
            }
            _ => ExecutionErrorKind::Permanent,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
