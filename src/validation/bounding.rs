//! Resource bounding: every accepted query carries a row cap.

use crate::validation::verdict::{RowCapAdjustment, ValidationStage, Violation, ViolationCode};
use sqlparser::ast::{Expr, Query, Value};

fn violation(detail: impl Into<String>) -> Violation {
    Violation::new(
        ViolationCode::RowCapExceeded,
        ValidationStage::ResourceBounding,
        detail,
    )
}

fn literal_limit(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(Value::Number(n, _)) => n.parse::<u64>().ok(),
        Expr::Nested(inner) => literal_limit(inner),
        _ => None,
    }
}

fn limit_expr(limit: u64) -> Expr {
    Expr::Value(Value::Number(limit.to_string(), false))
}

/// Apply the row cap to the outermost query.
///
/// `FETCH FIRST n ROWS ONLY` is rewritten to `LIMIT n` so there is a single
/// place the cap lives. Recursive CTEs, `PERCENT` and `WITH TIES` have no
/// bound we can enforce by rewriting and are rejected.
pub(crate) fn enforce_row_cap(
    query: &mut Query,
    max_rows: u64,
    recursive: bool,
) -> Result<RowCapAdjustment, Violation> {
    if recursive {
        return Err(violation("recursive common table expressions are not allowed"));
    }

    let mut requested_expr = query.limit.take();
    if let Some(fetch) = query.fetch.take() {
        if fetch.percent {
            return Err(violation("FETCH ... PERCENT is not allowed"));
        }
        if fetch.with_ties {
            return Err(violation("FETCH ... WITH TIES is not allowed"));
        }
        if requested_expr.is_none() {
            requested_expr = Some(fetch.quantity.unwrap_or_else(|| limit_expr(1)));
        }
    }

    let adjustment = match requested_expr {
        None => RowCapAdjustment::Injected { limit: max_rows },
        Some(expr) => match literal_limit(&expr) {
            Some(requested) if requested <= max_rows => RowCapAdjustment::Kept { limit: requested },
            Some(requested) => RowCapAdjustment::Clamped {
                requested: Some(requested),
                limit: max_rows,
            },
            // LIMIT ALL, parameters and expressions are replaced by the cap.
            None => RowCapAdjustment::Clamped {
                requested: None,
                limit: max_rows,
            },
        },
    };

    query.limit = Some(limit_expr(adjustment.effective_limit()));
    Ok(adjustment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::Statement;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    fn bound(sql: &str, max_rows: u64) -> (Result<RowCapAdjustment, Violation>, String) {
        let mut statement = Parser::parse_sql(&PostgreSqlDialect {}, sql).unwrap().remove(0);
        let result = match &mut statement {
            Statement::Query(query) => enforce_row_cap(query, max_rows, false),
            _ => panic!("not a query"),
        };
        (result, statement.to_string())
    }

    #[test]
    fn test_limit_injected() {
        let (adj, sql) = bound("SELECT name FROM sales_data.products", 10000);
        assert_eq!(adj.unwrap(), RowCapAdjustment::Injected { limit: 10000 });
        assert!(sql.ends_with("LIMIT 10000"));
    }

    #[test]
    fn test_limit_clamped() {
        let (adj, sql) = bound("SELECT name FROM sales_data.products LIMIT 50000", 10000);
        assert_eq!(
            adj.unwrap(),
            RowCapAdjustment::Clamped {
                requested: Some(50000),
                limit: 10000
            }
        );
        assert!(sql.contains("LIMIT 10000"));
        assert!(!sql.contains("50000"));
    }

    #[test]
    fn test_limit_kept() {
        let (adj, sql) = bound("SELECT name FROM sales_data.products ORDER BY name LIMIT 5", 10000);
        assert_eq!(adj.unwrap(), RowCapAdjustment::Kept { limit: 5 });
        assert!(sql.contains("LIMIT 5"));
    }

    #[test]
    fn test_fetch_first_becomes_limit() {
        let (adj, sql) = bound("SELECT name FROM sales_data.products FETCH FIRST 20000 ROWS ONLY", 100);
        assert_eq!(adj.unwrap().effective_limit(), 100);
        assert!(sql.contains("LIMIT 100"));
        assert!(!sql.contains("FETCH"));
    }

    #[test]
    fn test_recursive_rejected() {
        let mut statement = Parser::parse_sql(&PostgreSqlDialect {}, "SELECT 1").unwrap().remove(0);
        if let Statement::Query(query) = &mut statement {
            let err = enforce_row_cap(query, 10, true).unwrap_err();
            assert_eq!(err.code, ViolationCode::RowCapExceeded);
        }
    }
}
