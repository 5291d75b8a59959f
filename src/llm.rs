//! Generation boundary: an OpenAI-compatible chat-completions client.
//!
//! Whatever comes back is an untrusted candidate. [`clean_sql_response`] only
//! strips presentation noise; validation decides what may run.

use crate::error::{GatewayError, GenerationError, Result};
use crate::prompt::Prompt;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap();
    static ref SQL_LABEL: Regex = Regex::new(r"(?i)^\s*sql\s*:\s*").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: Prompt,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Raw candidate text for the request.
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError>;
}

/// Remove markdown fences, a leading `SQL:` label and surrounding whitespace.
pub fn clean_sql_response(raw: &str) -> String {
    let body = match CODE_FENCE.captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(raw),
        None => raw,
    };
    SQL_LABEL.replace(body, "").trim().to_string()
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.prompt.system},
                {"role": "user", "content": request.prompt.user}
            ],
            "temperature": request.temperature,
        });

        // Newer model families only accept max_completion_tokens
        if self.config.model.starts_with("gpt-5") || self.config.model.contains("o1") {
            body["max_completion_tokens"] = serde_json::json!(request.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
        }
        body
    }
}

#[async_trait]
impl SqlGenerator for LlmClient {
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        debug!("Requesting SQL from model {}", self.config.model);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| GenerationError(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GenerationError(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(GenerationError(format!("LLM API error: {}", error)));
        }

        let choice = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| GenerationError("No choices in LLM response".to_string()))?;

        match choice.get("finish_reason").and_then(|r| r.as_str()) {
            Some("length") => warn!("LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(GenerationError("LLM response was filtered by content policy".to_string()))
            }
            _ => {}
        }

        let content = choice["message"]["content"]
            .as_str()
            .ok_or_else(|| GenerationError("No content in LLM response".to_string()))?;

        let sql = clean_sql_response(content);
        if sql.is_empty() {
            return Err(GenerationError("Empty content in LLM response".to_string()));
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_fenced_response() {
        let raw = "Here you go:\n```sql\nSELECT name\nFROM sales_data.products\n```\n";
        assert_eq!(clean_sql_response(raw), "SELECT name\nFROM sales_data.products");
    }

    #[test]
    fn test_clean_label_and_whitespace() {
        assert_eq!(clean_sql_response("  SQL: SELECT 1  \n"), "SELECT 1");
        assert_eq!(clean_sql_response("```\nSELECT 2\n```"), "SELECT 2");
        assert_eq!(clean_sql_response("SELECT 3"), "SELECT 3");
    }

    #[test]
    fn test_cleaning_keeps_payload_untouched() {
        // Cleaning never removes stacked statements; the validator does.
        let raw = "```sql\nSELECT 1; DROP TABLE t;\n```";
        assert_eq!(clean_sql_response(raw), "SELECT 1; DROP TABLE t;");
    }

    #[test]
    fn test_request_body_token_field() {
        let config = LlmConfig {
            api_key: "k".to_string(),
            model: "gpt-5-mini".to_string(),
            base_url: "http://localhost".to_string(),
            timeout: Duration::from_secs(5),
        };
        let client = LlmClient::new(config).unwrap();
        let request = GenerationRequest {
            prompt: Prompt {
                system: "s".to_string(),
                user: "u".to_string(),
            },
            temperature: 0.1,
            max_tokens: 2000,
        };
        let body = client.request_body(&request);
        assert_eq!(body["max_completion_tokens"], 2000);
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["messages"][1]["content"], "u");
    }
}
