use crate::scope::DatasetScope;
use serde::{Deserialize, Serialize};

/// SQL text returned by the generator. Untrusted until validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlCandidate {
    pub sql: String,
    /// 1-based refinement attempt that produced this candidate.
    pub attempt: u32,
    pub question: String,
    pub scope: DatasetScope,
}

impl SqlCandidate {
    pub fn new(sql: impl Into<String>, attempt: u32, question: impl Into<String>, scope: DatasetScope) -> Self {
        Self {
            sql: sql.into(),
            attempt,
            question: question.into(),
            scope,
        }
    }

    /// Short form of the SQL for log lines.
    pub fn preview(&self) -> String {
        truncate_for_log(&self.sql, 100)
    }
}

pub(crate) fn truncate_for_log(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max_chars {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    } else {
        flat
    }
}
