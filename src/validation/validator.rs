//! SQL Validator
//!
//! Runs the five ordered stages over a candidate and produces a verdict. The
//! verdict is a pure function of candidate, snapshot and configuration: no
//! I/O, no shared state.
//!
//! Stages:
//! 1. statement shape (single statement, read-only leading clause)
//! 2. keyword blocklist (lexical pre-filter)
//! 3. structural parse
//! 4. scope allow-list (authoritative)
//! 5. resource bounding (row cap injected or clamped)

use crate::candidate::SqlCandidate;
use crate::schema::SchemaSnapshot;
use crate::scope::DatasetScope;
use crate::validation::bounding::enforce_row_cap;
use crate::validation::lexical::{
    check_keyword_blocklist, check_leading_clause, check_statement_shape, significant_tokens,
};
use crate::validation::scope_check::{check_scope, qualify_tables, UnqualifiedTablePolicy};
use crate::validation::verdict::{ValidationStage, ValidationVerdict, Violation, ViolationCode};
use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Row cap injected or clamped into every accepted query.
    pub max_rows: u64,
    pub unqualified_tables: UnqualifiedTablePolicy,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            unqualified_tables: UnqualifiedTablePolicy::QualifyInScope,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlValidator {
    config: ValidatorConfig,
}

impl SqlValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(&self, candidate: &SqlCandidate, snapshot: &SchemaSnapshot) -> ValidationVerdict {
        let verdict = self.validate_sql(&candidate.sql, &candidate.scope, snapshot);
        if verdict.allowed {
            debug!("Attempt {} accepted: {}", candidate.attempt, candidate.preview());
        } else {
            info!(
                "Attempt {} rejected at {:?}: {}",
                candidate.attempt,
                verdict.rejecting_stage(),
                verdict
                    .violations
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
        }
        verdict
    }

    pub fn validate_sql(&self, sql: &str, scope: &DatasetScope, snapshot: &SchemaSnapshot) -> ValidationVerdict {
        match self.run_stages(sql, scope, snapshot) {
            Ok(verdict) => verdict,
            Err(violations) => ValidationVerdict::rejected(violations),
        }
    }

    fn run_stages(
        &self,
        sql: &str,
        scope: &DatasetScope,
        snapshot: &SchemaSnapshot,
    ) -> Result<ValidationVerdict, Vec<Violation>> {
        // Stages 1 and 2 are lexical
        let tokens = significant_tokens(sql).map_err(|v| vec![v])?;
        check_statement_shape(&tokens).map_err(|v| vec![v])?;
        check_keyword_blocklist(&tokens)?;
        check_leading_clause(&tokens).map_err(|v| vec![v])?;

        // Stage 3
        let mut statement = parse_single(sql).map_err(|v| vec![v])?;

        // Stage 4
        if snapshot.dataset_id() != scope.dataset_id || snapshot.schema_name() != scope.schema_name {
            return Err(vec![Violation::new(
                ViolationCode::UnauthorizedReference,
                ValidationStage::ScopeAllowList,
                format!(
                    "schema snapshot for dataset {} does not match the requested scope",
                    snapshot.dataset_id()
                ),
            )]);
        }
        let report = check_scope(&statement, scope, snapshot, self.config.unqualified_tables)?;
        if report.needs_qualification {
            qualify_tables(&mut statement, &scope.schema_name);
        }

        // Stage 5
        let row_cap = match &mut statement {
            Statement::Query(query) => {
                enforce_row_cap(query, self.config.max_rows, report.recursive).map_err(|v| vec![v])?
            }
            _ => return Err(vec![not_a_query()]),
        };

        Ok(ValidationVerdict::accepted(statement.to_string(), row_cap))
    }
}

fn not_a_query() -> Violation {
    Violation::new(
        ViolationCode::NotReadOnly,
        ValidationStage::StructuralParse,
        "statement is not a query",
    )
}

fn parse_single(sql: &str) -> Result<Statement, Violation> {
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| {
        Violation::new(
            ViolationCode::ParseFailure,
            ValidationStage::StructuralParse,
            e.to_string(),
        )
    })?;

    if statements.len() != 1 {
        return Err(Violation::new(
            ViolationCode::MultiStatement,
            ValidationStage::StructuralParse,
            format!("expected one statement, parsed {}", statements.len()),
        ));
    }

    let statement = statements.remove(0);
    match statement {
        Statement::Query(_) => Ok(statement),
        _ => Err(not_a_query()),
    }
}

/// Validate with the default configuration.
pub fn validate_sql(sql: &str, scope: &DatasetScope, snapshot: &SchemaSnapshot) -> ValidationVerdict {
    SqlValidator::default().validate_sql(sql, scope, snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableShape;
    use crate::validation::verdict::RowCapAdjustment;

    fn scope() -> DatasetScope {
        DatasetScope::new(
            1,
            "Sales Analytics",
            "sales_data",
            vec!["products".to_string(), "sales".to_string()],
        )
    }

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new(
            1,
            "Sales Analytics",
            "sales_data",
            vec![
                TableShape::new("products", 100)
                    .with_column("product_id", "integer")
                    .with_column("name", "text")
                    .with_column("price", "numeric"),
                TableShape::new("sales", 1000)
                    .with_column("sale_id", "integer")
                    .with_column("product_id", "integer")
                    .with_column("amount", "numeric"),
            ],
        )
    }

    #[test]
    fn test_unqualified_select_is_qualified_and_capped() {
        let verdict = validate_sql("SELECT * FROM products", &scope(), &snapshot());
        assert!(verdict.allowed);
        assert_eq!(
            verdict.sanitized_sql.as_deref(),
            Some("SELECT * FROM sales_data.products LIMIT 10000")
        );
        assert_eq!(verdict.row_cap, Some(RowCapAdjustment::Injected { limit: 10000 }));
    }

    #[test]
    fn test_stacked_statements_rejected_before_parse() {
        let verdict = validate_sql(
            "SELECT * FROM sales_data.sales; DROP TABLE sales_data.sales;",
            &scope(),
            &snapshot(),
        );
        assert!(!verdict.allowed);
        assert_eq!(verdict.codes(), vec![ViolationCode::MultiStatement]);
        assert_eq!(verdict.rejecting_stage(), Some(ValidationStage::StatementShape));
    }

    #[test]
    fn test_delete_rejected_at_keyword_stage() {
        let verdict = validate_sql("DELETE FROM sales_data.sales WHERE 1=1", &scope(), &snapshot());
        assert_eq!(verdict.first_code(), Some(ViolationCode::ForbiddenKeyword));
        assert_eq!(verdict.rejecting_stage(), Some(ValidationStage::KeywordBlocklist));
    }

    #[test]
    fn test_non_select_rejected_before_parse() {
        let verdict = validate_sql("SHOW search_path", &scope(), &snapshot());
        assert_eq!(verdict.first_code(), Some(ViolationCode::NotReadOnly));
        assert_eq!(verdict.rejecting_stage(), Some(ValidationStage::StatementShape));
    }

    #[test]
    fn test_malformed_sql_is_parse_failure() {
        let verdict = validate_sql("SELECT name FROM sales_data.products WHERE (", &scope(), &snapshot());
        assert_eq!(verdict.first_code(), Some(ViolationCode::ParseFailure));
    }

    #[test]
    fn test_comment_obfuscation_still_checked_structurally() {
        let verdict = validate_sql(
            "SELECT name FROM sales_data./**/products UNION SELECT usename FROM pg_catalog.pg_user",
            &scope(),
            &snapshot(),
        );
        assert!(!verdict.allowed);
        assert_eq!(verdict.first_code(), Some(ViolationCode::UnauthorizedReference));
    }

    #[test]
    fn test_mismatched_snapshot_rejected() {
        let other = DatasetScope::new(2, "HR", "hr_data", vec!["products".to_string()]);
        let verdict = validate_sql("SELECT name FROM hr_data.products", &other, &snapshot());
        assert_eq!(verdict.first_code(), Some(ViolationCode::UnauthorizedReference));
    }

    #[test]
    fn test_reject_policy_requires_qualification() {
        let validator = SqlValidator::new(ValidatorConfig {
            max_rows: 100,
            unqualified_tables: UnqualifiedTablePolicy::Reject,
        });
        let verdict = validator.validate_sql("SELECT * FROM products", &scope(), &snapshot());
        assert_eq!(verdict.first_code(), Some(ViolationCode::UnauthorizedReference));

        let verdict = validator.validate_sql("SELECT * FROM sales_data.products LIMIT 500", &scope(), &snapshot());
        assert_eq!(
            verdict.sanitized_sql.as_deref(),
            Some("SELECT * FROM sales_data.products LIMIT 100")
        );
    }

    #[test]
    fn test_cross_schema_function_reads_rejected() {
        let cases = [
            ("SELECT table_to_xml('hr_data.salaries', true, false, '')", ValidationStage::KeywordBlocklist),
            ("SELECT schema_to_xml('hr_data', true, false, '')", ValidationStage::KeywordBlocklist),
            ("SELECT lo_get(16401)", ValidationStage::KeywordBlocklist),
            ("SELECT current_setting('data_directory')", ValidationStage::KeywordBlocklist),
            ("SELECT hr_data.dump_salaries()", ValidationStage::ScopeAllowList),
            ("SELECT name, sales_data.margin(price) FROM sales_data.products", ValidationStage::ScopeAllowList),
        ];
        for (sql, stage) in cases {
            let verdict = validate_sql(sql, &scope(), &snapshot());
            assert!(!verdict.allowed, "{} should be rejected", sql);
            assert!(verdict.sanitized_sql.is_none());
            assert_eq!(verdict.rejecting_stage(), Some(stage), "{}", sql);
        }
    }

    #[test]
    fn test_subquery_cte_cannot_hide_outer_table() {
        let sql = "SELECT * FROM salaries WHERE 1 IN (WITH salaries AS (SELECT 1 AS x) SELECT x FROM salaries)";
        for policy in [UnqualifiedTablePolicy::QualifyInScope, UnqualifiedTablePolicy::Reject] {
            let validator = SqlValidator::new(ValidatorConfig {
                max_rows: 100,
                unqualified_tables: policy,
            });
            let verdict = validator.validate_sql(sql, &scope(), &snapshot());
            assert_eq!(verdict.first_code(), Some(ViolationCode::UnauthorizedReference));
        }
    }

    #[test]
    fn test_command_word_column_accepted() {
        let snapshot = SchemaSnapshot::new(
            1,
            "Sales Analytics",
            "sales_data",
            vec![TableShape::new("products", 10)
                .with_column("name", "text")
                .with_column("lock", "boolean")],
        );
        let verdict = validate_sql("SELECT name, lock FROM sales_data.products", &scope(), &snapshot);
        assert!(verdict.allowed, "{:?}", verdict.violations);
    }

    #[test]
    fn test_verdict_is_deterministic() {
        let sql = "SELECT p.name, SUM(s.amount) AS revenue FROM sales_data.sales s \
                   JOIN sales_data.products p ON p.product_id = s.product_id GROUP BY p.name";
        let first = validate_sql(sql, &scope(), &snapshot());
        let second = validate_sql(sql, &scope(), &snapshot());
        assert!(first.allowed);
        assert_eq!(first, second);
    }
}
