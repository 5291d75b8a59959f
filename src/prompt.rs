//! Prompt Composer
//!
//! Builds the generation request from the scope snapshot, the question and the
//! failures of earlier attempts. Composition is a pure function of its
//! arguments.

use crate::refinement::AttemptRecord;
use crate::schema::SchemaSnapshot;
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You are an expert PostgreSQL query generator for a business analytics platform. \
You convert natural language questions into a single safe, read-only SELECT statement. \
Return only the raw SQL.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(
        &self,
        question: &str,
        snapshot: &SchemaSnapshot,
        user_role: &str,
        prior_attempts: &[AttemptRecord],
    ) -> Prompt {
        let schema = snapshot.schema_name();
        let example_table = snapshot
            .tables()
            .first()
            .map(|t| t.name.as_str())
            .unwrap_or("table_name");

        let mut user = format!(
            r#"CONTEXT:
- Dataset: {dataset}
- User Role: {role}
- Database: PostgreSQL

DATABASE SCHEMA:
{schema_text}

STRICT RULES:
1. Generate exactly ONE SELECT query (a WITH ... SELECT is fine). No INSERT, UPDATE, DELETE, DROP, ALTER, TRUNCATE, GRANT, CREATE, COPY or EXEC.
2. Use proper PostgreSQL syntax.
3. ALWAYS qualify tables with the schema name (e.g., {schema}.{example}, not just {example}).
4. Use only the tables and columns listed above.
5. Use aggregation functions (COUNT, SUM, AVG, MAX, MIN) and GROUP BY when needed.
6. Add ORDER BY for sorting results logically.
7. Do not add LIMIT unless the question asks for a specific number of rows; a row cap is applied automatically.
8. Do not use recursive queries, locking clauses (FOR UPDATE / FOR SHARE) or SELECT ... INTO.
9. Use JOINs when querying multiple tables, with simple table aliases (e.g., 'p' for products).
10. Use meaningful column aliases for complex expressions.
11. Return ONLY the SQL query: no explanations, no markdown formatting, no comments.
"#,
            dataset = snapshot.dataset_name(),
            role = user_role,
            schema_text = snapshot.render_for_prompt(),
            schema = schema,
            example = example_table,
        );

        let failures: Vec<&AttemptRecord> = prior_attempts.iter().filter(|a| a.failure.is_some()).collect();
        if !failures.is_empty() {
            user.push_str("\nPREVIOUS ATTEMPTS (do not repeat these mistakes):\n");
            for record in failures {
                if let Some(failure) = &record.failure {
                    user.push_str(&format!(
                        "\nAttempt {}:\nSQL:\n{}\nProblem: {}\n",
                        record.attempt, record.candidate_sql, failure
                    ));
                    for hint in failure.hints() {
                        user.push_str(&format!("Fix: {}\n", hint));
                    }
                }
            }
        }

        user.push_str(&format!(
            "\nUSER QUESTION:\n{}\n\nGenerate the PostgreSQL SELECT query that answers this question.\nReturn ONLY the raw SQL query, nothing else.\n",
            question.trim()
        ));

        Prompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}
