//! Refinement state machine and per-attempt records.
//!
//! Each attempt produces one immutable [`AttemptRecord`]; the loop never
//! edits a record after it is pushed, and the next prompt is composed only
//! from the records.

use crate::error::ExecutionError;
use crate::validation::{Violation, ViolationCode};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Composing { attempt: u32 },
    Generated { attempt: u32 },
    Validating { attempt: u32 },
    Executing { attempt: u32 },
    Refining { attempt: u32 },
    Succeeded { attempt: u32 },
    ExhaustedFailed { attempts: u32 },
    /// Generation or a transient execution failure ended the request early.
    Aborted { attempt: u32 },
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopState::Succeeded { .. } | LoopState::ExhaustedFailed { .. } | LoopState::Aborted { .. }
        )
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: &LoopState) -> bool {
        use LoopState::*;
        match (self, next) {
            (Composing { attempt: a }, Generated { attempt: b }) => a == b,
            (Composing { attempt: a }, Aborted { attempt: b }) => a == b,
            (Generated { attempt: a }, Validating { attempt: b }) => a == b,
            (Validating { attempt: a }, Executing { attempt: b }) => a == b,
            (Validating { attempt: a }, Refining { attempt: b }) => a == b,
            (Executing { attempt: a }, Succeeded { attempt: b }) => a == b,
            (Executing { attempt: a }, Refining { attempt: b }) => a == b,
            (Executing { attempt: a }, Aborted { attempt: b }) => a == b,
            (Refining { attempt: a }, Composing { attempt: b }) => *b == a + 1,
            (Refining { attempt: a }, ExhaustedFailed { attempts: b }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Composing { attempt } => write!(f, "Composing[{}]", attempt),
            LoopState::Generated { attempt } => write!(f, "Generated[{}]", attempt),
            LoopState::Validating { attempt } => write!(f, "Validating[{}]", attempt),
            LoopState::Executing { attempt } => write!(f, "Executing[{}]", attempt),
            LoopState::Refining { attempt } => write!(f, "Refining[{}]", attempt),
            LoopState::Succeeded { attempt } => write!(f, "Succeeded[{}]", attempt),
            LoopState::ExhaustedFailed { attempts } => write!(f, "ExhaustedFailed[{}]", attempts),
            LoopState::Aborted { attempt } => write!(f, "Aborted[{}]", attempt),
        }
    }
}

/// Why an attempt did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptFailure {
    Rejected { violations: Vec<Violation> },
    Execution(ExecutionError),
}

impl AttemptFailure {
    /// Short label for user-facing text: a violation code or the error kind.
    pub fn label(&self) -> String {
        match self {
            AttemptFailure::Rejected { violations } => violations
                .first()
                .map(|v| v.code.to_string())
                .unwrap_or_else(|| "Rejected".to_string()),
            AttemptFailure::Execution(e) => format!("{} execution error", e.kind),
        }
    }

    pub fn codes(&self) -> Vec<ViolationCode> {
        match self {
            AttemptFailure::Rejected { violations } => violations.iter().map(|v| v.code).collect(),
            AttemptFailure::Execution(_) => Vec::new(),
        }
    }

    /// Instructions for the next generation, one per distinct code.
    pub fn hints(&self) -> Vec<&'static str> {
        match self {
            AttemptFailure::Rejected { violations } => {
                let mut hints: Vec<&'static str> = Vec::new();
                for v in violations {
                    let hint = v.code.regeneration_hint();
                    if !hints.contains(&hint) {
                        hints.push(hint);
                    }
                }
                hints
            }
            AttemptFailure::Execution(_) => {
                vec!["The database rejected the query. Fix the error using only the schema above."]
            }
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Rejected { violations } => {
                let parts: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
                write!(f, "rejected: {}", parts.join("; "))
            }
            AttemptFailure::Execution(e) => write!(f, "{}", e),
        }
    }
}

/// One generation/validation/execution round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub candidate_sql: String,
    pub sanitized_sql: Option<String>,
    pub failure: Option<AttemptFailure>,
    /// Transient execution retries spent inside this attempt.
    pub transient_retries: u32,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// SQL that was last tried for this attempt, sanitized if it got that far.
    pub fn last_sql(&self) -> &str {
        self.sanitized_sql.as_deref().unwrap_or(&self.candidate_sql)
    }
}
