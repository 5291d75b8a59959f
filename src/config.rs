//! Gateway configuration, read from the environment.

use crate::db::PoolSettings;
use crate::error::{GatewayError, Result};
use crate::execution::RetryPolicy;
use crate::llm::LlmConfig;
use crate::refinement::RefinementConfig;
use crate::validation::{UnqualifiedTablePolicy, ValidatorConfig};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub database_url: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub llm_timeout: Duration,
    pub max_query_rows: u64,
    pub statement_timeout: Duration,
    pub max_refinement_attempts: u32,
    pub transient_retries: u32,
    pub schema_cache_ttl: Duration,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub require_qualified_tables: bool,
    pub log_level: String,
}

impl GatewayConfig {
    /// Load from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup and validate the result.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| GatewayError::Config(format!("{} is required", key)))
        };
        let string_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            database_url: required("DATABASE_URL")?,
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_model: string_or("OPENAI_MODEL", "gpt-4o-mini"),
            openai_base_url: string_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            llm_temperature: parse_or(&lookup, "LLM_TEMPERATURE", 0.1)?,
            llm_max_tokens: parse_or(&lookup, "LLM_MAX_TOKENS", 2000)?,
            llm_timeout: Duration::from_secs(parse_or(&lookup, "LLM_TIMEOUT_SECONDS", 30)?),
            max_query_rows: parse_or(&lookup, "MAX_QUERY_ROWS", 10_000)?,
            statement_timeout: Duration::from_millis(parse_or(&lookup, "STATEMENT_TIMEOUT_MS", 30_000)?),
            max_refinement_attempts: parse_or(&lookup, "MAX_REFINEMENT_ATTEMPTS", 3)?,
            transient_retries: parse_or(&lookup, "TRANSIENT_RETRIES", 1)?,
            schema_cache_ttl: Duration::from_secs(parse_or(&lookup, "SCHEMA_CACHE_TTL_SECONDS", 300)?),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            db_acquire_timeout: Duration::from_secs(parse_or(&lookup, "DB_ACQUIRE_TIMEOUT_SECONDS", 30)?),
            require_qualified_tables: parse_or(&lookup, "REQUIRE_QUALIFIED_TABLES", false)?,
            log_level: string_or("LOG_LEVEL", "info"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_query_rows == 0 {
            return Err(GatewayError::Config("MAX_QUERY_ROWS must be positive".to_string()));
        }
        if self.max_refinement_attempts == 0 {
            return Err(GatewayError::Config("MAX_REFINEMENT_ATTEMPTS must be positive".to_string()));
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(GatewayError::Config("LLM_TEMPERATURE must be between 0 and 2".to_string()));
        }
        if self.statement_timeout.is_zero() {
            return Err(GatewayError::Config("STATEMENT_TIMEOUT_MS must be positive".to_string()));
        }
        if self.db_max_connections == 0 {
            return Err(GatewayError::Config("DB_MAX_CONNECTIONS must be positive".to_string()));
        }
        Ok(())
    }

    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig {
            max_rows: self.max_query_rows,
            unqualified_tables: if self.require_qualified_tables {
                UnqualifiedTablePolicy::Reject
            } else {
                UnqualifiedTablePolicy::QualifyInScope
            },
        }
    }

    pub fn refinement_config(&self) -> RefinementConfig {
        RefinementConfig {
            max_attempts: self.max_refinement_attempts,
            temperature: self.llm_temperature,
            max_tokens: self.llm_max_tokens,
            statement_timeout: self.statement_timeout,
            transient_retry: RetryPolicy::new(self.transient_retries, Duration::from_millis(200)),
        }
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.openai_api_key.clone(),
            model: self.openai_model.clone(),
            base_url: self.openai_base_url.clone(),
            timeout: self.llm_timeout,
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.db_max_connections,
            acquire_timeout: self.db_acquire_timeout,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| GatewayError::Config(format!("Invalid {}='{}': {}", key, raw, e))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap();
        assert_eq!(config.max_query_rows, 10_000);
        assert_eq!(config.max_refinement_attempts, 3);
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.statement_timeout, Duration::from_millis(30_000));
        assert_eq!(
            config.validator_config().unqualified_tables,
            UnqualifiedTablePolicy::QualifyInScope
        );
    }

    #[test]
    fn test_missing_required_key() {
        let err = GatewayConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let base = [
            ("DATABASE_URL", "postgres://localhost/app"),
            ("OPENAI_API_KEY", "sk-test"),
        ];
        let mut pairs = base.to_vec();
        pairs.push(("MAX_QUERY_ROWS", "lots"));
        assert!(GatewayConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = base.to_vec();
        pairs.push(("MAX_REFINEMENT_ATTEMPTS", "0"));
        assert!(GatewayConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = base.to_vec();
        pairs.push(("REQUIRE_QUALIFIED_TABLES", "true"));
        let config = GatewayConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.validator_config().unqualified_tables, UnqualifiedTablePolicy::Reject);
    }
}
