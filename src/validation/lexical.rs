//! Lexical stages: statement shape and keyword blocklist.
//!
//! Both run on the token stream before any parse is attempted. Comments and
//! whitespace are dropped by the tokenizer, and string literals, dollar-quoted
//! bodies and quoted identifiers arrive as their own tokens, so keywords are
//! only matched at top level.

use crate::validation::functions::is_blocked_function;
use crate::validation::verdict::{ValidationStage, Violation, ViolationCode};
use lazy_static::lazy_static;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::collections::HashSet;

lazy_static! {
    /// Rejected wherever they appear as a bare word.
    static ref BLOCKED_KEYWORDS: HashSet<&'static str> = [
        "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT",
        "DROP", "ALTER", "TRUNCATE", "CREATE",
        "GRANT", "REVOKE", "COPY", "INTO",
    ]
    .into_iter()
    .collect();

    /// Only commands when they open the statement; elsewhere they are
    /// ordinary column names.
    static ref BLOCKED_COMMANDS: HashSet<&'static str> = [
        "RENAME", "REASSIGN",
        "EXEC", "EXECUTE", "CALL", "DO", "PREPARE", "DEALLOCATE", "IMPORT",
        "VACUUM", "ANALYZE", "REINDEX", "REFRESH", "CHECKPOINT", "CLUSTER",
        "LOCK", "LISTEN", "NOTIFY", "UNLISTEN",
        "ATTACH", "DETACH", "LOAD", "RESET", "DISCARD", "SET",
    ]
    .into_iter()
    .collect();
}

/// Significant tokens of the candidate, without whitespace, comments or EOF.
pub(crate) fn significant_tokens(sql: &str) -> Result<Vec<Token>, Violation> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql).tokenize().map_err(|e| {
        Violation::new(
            ViolationCode::ParseFailure,
            ValidationStage::StatementShape,
            format!("candidate could not be tokenized: {}", e),
        )
    })?;

    Ok(tokens
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
        .collect())
}

/// Stage 1: one statement only. A terminator may only be followed by whitespace.
pub(crate) fn check_statement_shape(tokens: &[Token]) -> Result<(), Violation> {
    if tokens.is_empty() {
        return Err(Violation::new(
            ViolationCode::NotReadOnly,
            ValidationStage::StatementShape,
            "candidate is empty",
        ));
    }

    if let Some(pos) = tokens.iter().position(|t| matches!(t, Token::SemiColon)) {
        if let Some(next) = tokens.get(pos + 1) {
            return Err(Violation::new(
                ViolationCode::MultiStatement,
                ValidationStage::StatementShape,
                format!("content after statement terminator starting at '{}'", next),
            ));
        }
    }

    Ok(())
}

/// Stage 1, leading clause: SELECT, WITH, or a parenthesised SELECT.
///
/// Runs after the blocklist so data-modifying statements are reported by
/// keyword rather than by shape.
pub(crate) fn check_leading_clause(tokens: &[Token]) -> Result<(), Violation> {
    let first = tokens.iter().find(|t| !matches!(t, Token::LParen));
    match first {
        Some(Token::Word(w)) if w.quote_style.is_none() => {
            let upper = w.value.to_uppercase();
            if upper == "SELECT" || upper == "WITH" {
                Ok(())
            } else {
                Err(Violation::new(
                    ViolationCode::NotReadOnly,
                    ValidationStage::StatementShape,
                    format!("statement starts with '{}'", w.value),
                ))
            }
        }
        Some(other) => Err(Violation::new(
            ViolationCode::NotReadOnly,
            ValidationStage::StatementShape,
            format!("statement starts with '{}'", other),
        )),
        None => Err(Violation::new(
            ViolationCode::NotReadOnly,
            ValidationStage::StatementShape,
            "candidate has no statement",
        )),
    }
}

/// Stage 2: data-modifying or administrative keywords and side-effect functions.
///
/// A cheap pre-filter; the scope allow-list on the parsed tree is the
/// authoritative gate.
pub(crate) fn check_keyword_blocklist(tokens: &[Token]) -> Result<(), Vec<Violation>> {
    let mut violations: Vec<Violation> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let leading = tokens.iter().position(|t| !matches!(t, Token::LParen));

    for (i, token) in tokens.iter().enumerate() {
        let word = match token {
            Token::Word(w) if w.quote_style.is_none() => w,
            _ => continue,
        };

        let upper = word.value.to_uppercase();
        let blocked = BLOCKED_KEYWORDS.contains(upper.as_str())
            || (Some(i) == leading && BLOCKED_COMMANDS.contains(upper.as_str()));
        if blocked {
            if seen.insert(upper.clone()) {
                violations.push(Violation::new(
                    ViolationCode::ForbiddenKeyword,
                    ValidationStage::KeywordBlocklist,
                    format!("forbidden keyword {}", upper),
                ));
            }
            continue;
        }

        let is_call = matches!(tokens.get(i + 1), Some(Token::LParen));
        if is_call && is_blocked_function(&word.value) {
            let lower = word.value.to_lowercase();
            if seen.insert(lower.clone()) {
                violations.push(Violation::new(
                    ViolationCode::ForbiddenKeyword,
                    ValidationStage::KeywordBlocklist,
                    format!("forbidden function {}()", lower),
                ));
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(sql: &str) -> Vec<Token> {
        significant_tokens(sql).unwrap()
    }

    #[test]
    fn test_trailing_terminator_is_allowed() {
        assert!(check_statement_shape(&tokens("SELECT 1;  \n")).is_ok());
        assert!(check_statement_shape(&tokens("SELECT 1; -- trailing note")).is_ok());
    }

    #[test]
    fn test_stacked_statement_rejected() {
        let err = check_statement_shape(&tokens("SELECT 1; SELECT 2")).unwrap_err();
        assert_eq!(err.code, ViolationCode::MultiStatement);

        let err = check_statement_shape(&tokens("SELECT 1;;")).unwrap_err();
        assert_eq!(err.code, ViolationCode::MultiStatement);
    }

    #[test]
    fn test_semicolon_inside_literal_is_not_a_terminator() {
        assert!(check_statement_shape(&tokens("SELECT 'a; DROP TABLE x' AS s")).is_ok());
    }

    #[test]
    fn test_keyword_inside_literal_or_comment_is_ignored() {
        assert!(check_keyword_blocklist(&tokens("SELECT 'please delete me' AS note")).is_ok());
        assert!(check_keyword_blocklist(&tokens("SELECT 1 /* DROP TABLE x */")).is_ok());
        assert!(check_keyword_blocklist(&tokens("SELECT \"update\" FROM t")).is_ok());
    }

    #[test]
    fn test_keyword_as_identifier_fragment_is_ignored() {
        assert!(check_keyword_blocklist(&tokens("SELECT created_at, last_update FROM t")).is_ok());
    }

    #[test]
    fn test_blocked_keywords_detected() {
        let errs = check_keyword_blocklist(&tokens("delete from sales_data.sales where 1=1")).unwrap_err();
        assert_eq!(errs[0].code, ViolationCode::ForbiddenKeyword);
        assert_eq!(errs[0].stage, ValidationStage::KeywordBlocklist);

        let errs = check_keyword_blocklist(&tokens("SELECT * INTO backup FROM t")).unwrap_err();
        assert!(errs[0].detail.contains("INTO"));
    }

    #[test]
    fn test_blocked_function_call_detected() {
        let errs = check_keyword_blocklist(&tokens("SELECT pg_sleep(30)")).unwrap_err();
        assert!(errs[0].detail.contains("pg_sleep"));
        assert!(check_keyword_blocklist(&tokens("SELECT pg_sleep FROM t")).is_ok());
    }

    #[test]
    fn test_command_words_only_blocked_when_leading() {
        let sql = "SELECT call, load, lock, do, reset, refresh FROM t";
        assert!(check_keyword_blocklist(&tokens(sql)).is_ok());

        let errs = check_keyword_blocklist(&tokens("CALL sales_data.purge()")).unwrap_err();
        assert_eq!(errs[0].detail, "forbidden keyword CALL");
        let errs = check_keyword_blocklist(&tokens("(LOCK TABLE t)")).unwrap_err();
        assert!(errs[0].detail.contains("LOCK"));
    }

    #[test]
    fn test_catalog_dump_functions_detected() {
        for sql in [
            "SELECT table_to_xml('hr_data.salaries', true, false, '')",
            "SELECT lo_get(16401)",
            "SELECT current_setting('data_directory')",
            "SELECT * FROM pg_catalog.pg_ls_dir('.')",
        ] {
            let errs = check_keyword_blocklist(&tokens(sql)).unwrap_err();
            assert_eq!(errs[0].code, ViolationCode::ForbiddenKeyword, "{}", sql);
        }
    }

    #[test]
    fn test_leading_clause() {
        assert!(check_leading_clause(&tokens("WITH x AS (SELECT 1) SELECT * FROM x")).is_ok());
        assert!(check_leading_clause(&tokens("(SELECT 1)")).is_ok());
        let err = check_leading_clause(&tokens("SHOW search_path")).unwrap_err();
        assert_eq!(err.code, ViolationCode::NotReadOnly);
    }

    #[test]
    fn test_empty_candidate() {
        let err = check_statement_shape(&tokens("  -- nothing here\n")).unwrap_err();
        assert_eq!(err.code, ViolationCode::NotReadOnly);
    }
}
