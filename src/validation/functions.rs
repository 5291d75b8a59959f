//! Function allow-list and side-effect denylist.
//!
//! Only built-in aggregate, window and scalar functions that read nothing
//! beyond their arguments are callable. The denylist exists so the lexical
//! stage can reject the obvious cases before parsing and report them as
//! forbidden rather than unknown.

use lazy_static::lazy_static;
use std::collections::HashSet;

lazy_static! {
    static ref BLOCKED_FUNCTIONS: HashSet<&'static str> = [
        "pg_sleep", "pg_sleep_for", "pg_sleep_until",
        "pg_stat_file", "pg_file_write",
        "dblink", "dblink_exec", "dblink_connect",
        "current_setting", "set_config", "pg_reload_conf", "pg_rotate_logfile",
        "pg_terminate_backend", "pg_cancel_backend",
        "txid_current", "nextval", "setval", "currval", "lastval",
        "xp_cmdshell", "load_file",
    ]
    .into_iter()
    .collect();

    static ref ALLOWED_FUNCTIONS: HashSet<&'static str> = [
        // aggregates
        "count", "sum", "avg", "min", "max",
        "stddev", "stddev_pop", "stddev_samp", "variance", "var_pop", "var_samp",
        "string_agg", "array_agg", "bool_and", "bool_or", "every",
        "percentile_cont", "percentile_disc", "mode",
        "corr", "covar_pop", "covar_samp", "regr_slope", "regr_intercept", "regr_r2",
        "json_agg", "jsonb_agg", "json_object_agg", "jsonb_object_agg",
        // window
        "row_number", "rank", "dense_rank", "percent_rank", "cume_dist", "ntile",
        "lag", "lead", "first_value", "last_value", "nth_value",
        // conditional
        "coalesce", "nullif", "greatest", "least",
        // math
        "abs", "ceil", "ceiling", "floor", "round", "trunc", "sign", "sqrt", "cbrt",
        "power", "pow", "exp", "ln", "log", "log10", "mod", "div", "width_bucket",
        // text
        "lower", "upper", "initcap", "length", "char_length", "character_length", "octet_length",
        "substr", "substring", "left", "right", "trim", "btrim", "ltrim", "rtrim", "lpad", "rpad",
        "replace", "translate", "concat", "concat_ws", "position", "strpos", "split_part",
        "reverse", "repeat", "starts_with", "regexp_replace", "regexp_match", "md5",
        "to_char", "to_number", "to_date", "to_timestamp",
        // date and time
        "now", "current_date", "current_time", "current_timestamp", "localtime", "localtimestamp",
        "date_trunc", "date_part", "date_bin", "extract", "age", "isfinite",
        "make_date", "make_time", "make_timestamp", "make_interval",
        "justify_days", "justify_hours", "justify_interval",
        // json and arrays
        "to_json", "to_jsonb", "json_build_object", "jsonb_build_object",
        "json_build_array", "jsonb_build_array",
        "json_extract_path_text", "jsonb_extract_path_text", "jsonb_typeof", "json_typeof",
        "array_length", "cardinality", "array_position", "unnest",
    ]
    .into_iter()
    .collect();
}

/// Families matched by prefix or infix rather than by name.
const BLOCKED_PREFIXES: &[&str] = &["pg_ls_", "pg_read_", "lo_", "dblink", "pg_advisory"];
const BLOCKED_INFIXES: &[&str] = &["_to_xml"];

/// Side-effect, file, large-object, settings and catalog-dump functions.
pub fn is_blocked_function(name: &str) -> bool {
    let lower = name.to_lowercase();
    BLOCKED_FUNCTIONS.contains(lower.as_str())
        || BLOCKED_PREFIXES.iter().any(|p| lower.starts_with(p))
        || BLOCKED_INFIXES.iter().any(|i| lower.contains(i))
}

/// `name` must already be folded the way PostgreSQL folds identifiers.
pub fn is_allowed_function(name: &str) -> bool {
    ALLOWED_FUNCTIONS.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_families() {
        for name in [
            "table_to_xml",
            "schema_to_xml",
            "query_to_xml_and_xmlschema",
            "lo_get",
            "lo_import",
            "pg_ls_dir",
            "pg_ls_waldir",
            "pg_read_binary_file",
            "current_setting",
            "PG_SLEEP",
        ] {
            assert!(is_blocked_function(name), "{} should be blocked", name);
        }
    }

    #[test]
    fn test_common_builtins_allowed() {
        for name in ["count", "sum", "date_trunc", "coalesce", "row_number", "lower"] {
            assert!(is_allowed_function(name));
            assert!(!is_blocked_function(name));
        }
        assert!(!is_allowed_function("COUNT"));
        assert!(!is_allowed_function("dump_salaries"));
        assert!(!is_allowed_function("version"));
    }
}
