//! Validation verdict and violation taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationCode {
    MultiStatement,
    ForbiddenKeyword,
    NotReadOnly,
    ParseFailure,
    UnauthorizedReference,
    RowCapExceeded,
}

impl ViolationCode {
    /// Instruction appended to a regeneration prompt for this failure.
    pub fn regeneration_hint(&self) -> &'static str {
        match self {
            ViolationCode::MultiStatement => {
                "Return exactly one statement. Do not use semicolons to chain statements."
            }
            ViolationCode::ForbiddenKeyword => {
                "Only read data. Do not use INSERT, UPDATE, DELETE, DDL, INTO, locking clauses or administrative functions."
            }
            ViolationCode::NotReadOnly => "The statement must start with SELECT or WITH.",
            ViolationCode::ParseFailure => "The SQL was not valid PostgreSQL syntax. Check parentheses, commas and quoting.",
            ViolationCode::UnauthorizedReference => {
                "Reference only the tables and columns listed in the schema, qualified with the schema name."
            }
            ViolationCode::RowCapExceeded => {
                "Do not use recursive queries or FETCH ... PERCENT / WITH TIES."
            }
        }
    }
}

impl fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ViolationCode::MultiStatement => "MultiStatement",
            ViolationCode::ForbiddenKeyword => "ForbiddenKeyword",
            ViolationCode::NotReadOnly => "NotReadOnly",
            ViolationCode::ParseFailure => "ParseFailure",
            ViolationCode::UnauthorizedReference => "UnauthorizedReference",
            ViolationCode::RowCapExceeded => "RowCapExceeded",
        };
        write!(f, "{}", label)
    }
}

/// Ordered validation stages; a candidate stops at the first one that rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValidationStage {
    StatementShape,
    KeywordBlocklist,
    StructuralParse,
    ScopeAllowList,
    ResourceBounding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub stage: ValidationStage,
    pub detail: String,
}

impl Violation {
    pub fn new(code: ViolationCode, stage: ValidationStage, detail: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

/// What the resource-bounding stage did to the row limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowCapAdjustment {
    /// No limit was present; the configured maximum was added.
    Injected { limit: u64 },
    /// The requested limit was above the maximum (or not a literal) and was replaced.
    Clamped { requested: Option<u64>, limit: u64 },
    /// The requested limit was within bounds.
    Kept { limit: u64 },
}

impl RowCapAdjustment {
    pub fn effective_limit(&self) -> u64 {
        match self {
            RowCapAdjustment::Injected { limit }
            | RowCapAdjustment::Clamped { limit, .. }
            | RowCapAdjustment::Kept { limit } => *limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub allowed: bool,
    /// Empty when allowed; otherwise the findings of the first rejecting stage.
    pub violations: Vec<Violation>,
    /// Candidate with qualification and row cap applied; only set when allowed.
    pub sanitized_sql: Option<String>,
    pub row_cap: Option<RowCapAdjustment>,
}

impl ValidationVerdict {
    pub fn accepted(sanitized_sql: String, row_cap: RowCapAdjustment) -> Self {
        Self {
            allowed: true,
            violations: Vec::new(),
            sanitized_sql: Some(sanitized_sql),
            row_cap: Some(row_cap),
        }
    }

    pub fn rejected(violations: Vec<Violation>) -> Self {
        Self {
            allowed: false,
            violations,
            sanitized_sql: None,
            row_cap: None,
        }
    }

    pub fn codes(&self) -> Vec<ViolationCode> {
        self.violations.iter().map(|v| v.code).collect()
    }

    pub fn first_code(&self) -> Option<ViolationCode> {
        self.violations.first().map(|v| v.code)
    }

    pub fn rejecting_stage(&self) -> Option<ValidationStage> {
        self.violations.first().map(|v| v.stage)
    }
}
