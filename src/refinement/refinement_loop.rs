//! Refinement Loop
//!
//! Bounded compose → generate → validate → execute cycle. Validation
//! rejections and permanent execution errors feed the next prompt; transient
//! execution errors are retried in place and, if they persist, end the
//! request without spending another attempt. Generation failures get one
//! immediate retry.

use crate::candidate::SqlCandidate;
use crate::error::{GatewayError, GenerationError};
use crate::execution::{ExecutionResult, QueryRunner, RetryPolicy};
use crate::llm::{clean_sql_response, GenerationRequest, SqlGenerator};
use crate::prompt::PromptComposer;
use crate::refinement::state::{AttemptFailure, AttemptRecord, LoopState};
use crate::schema::SchemaSnapshot;
use crate::scope::{DatasetScope, UserContext};
use crate::validation::{RowCapAdjustment, SqlValidator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RefinementConfig {
    pub max_attempts: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub statement_timeout: Duration,
    pub transient_retry: RetryPolicy,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            temperature: 0.1,
            max_tokens: 2000,
            statement_timeout: Duration::from_millis(30_000),
            transient_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub enum RefinementOutcome {
    Succeeded {
        final_sql: String,
        row_cap: RowCapAdjustment,
        result: ExecutionResult,
    },
    ExhaustedFailed {
        last: AttemptFailure,
    },
    /// Generation failed twice in a row, or a transient execution error
    /// outlived its retries.
    Aborted {
        error: GatewayError,
    },
}

/// Everything one run produced: the terminal outcome, the immutable
/// per-attempt records and the state trail.
#[derive(Debug)]
pub struct RefinementRun {
    pub outcome: RefinementOutcome,
    pub attempts: Vec<AttemptRecord>,
    pub states: Vec<LoopState>,
}

impl RefinementRun {
    pub fn final_state(&self) -> Option<&LoopState> {
        self.states.last()
    }

    /// SQL of the most recent attempt, sanitized when it got that far.
    pub fn last_sql(&self) -> Option<&str> {
        self.attempts.last().map(|a| a.last_sql())
    }
}

struct StateTrail {
    states: Vec<LoopState>,
}

impl StateTrail {
    fn new() -> Self {
        Self { states: Vec::new() }
    }

    fn advance(&mut self, next: LoopState) {
        if let Some(current) = self.states.last() {
            debug_assert!(
                current.can_transition_to(&next),
                "illegal transition {} -> {}",
                current,
                next
            );
            debug!("Refinement state {} -> {}", current, next);
        }
        self.states.push(next);
    }
}

pub struct RefinementLoop {
    generator: Arc<dyn SqlGenerator>,
    runner: Arc<dyn QueryRunner>,
    validator: SqlValidator,
    composer: PromptComposer,
    config: RefinementConfig,
}

impl RefinementLoop {
    pub fn new(
        generator: Arc<dyn SqlGenerator>,
        runner: Arc<dyn QueryRunner>,
        validator: SqlValidator,
        mut config: RefinementConfig,
    ) -> Self {
        config.max_attempts = config.max_attempts.max(1);
        Self {
            generator,
            runner,
            validator,
            composer: PromptComposer::new(),
            config,
        }
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        match self.generator.generate(request).await {
            Ok(raw) => Ok(raw),
            Err(first) => {
                warn!("Generation failed, retrying once: {}", first);
                self.generator.generate(request).await
            }
        }
    }

    pub async fn run(
        &self,
        question: &str,
        scope: &DatasetScope,
        snapshot: &SchemaSnapshot,
        user: &UserContext,
    ) -> RefinementRun {
        let max_attempts = self.config.max_attempts;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut trail = StateTrail::new();

        for attempt in 1..=max_attempts {
            info!("Refinement attempt {} of {}", attempt, max_attempts);
            trail.advance(LoopState::Composing { attempt });

            let prompt = self.composer.compose(question, snapshot, &user.role, &attempts);
            let request = GenerationRequest {
                prompt,
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };

            let raw = match self.generate(&request).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Generation unavailable, aborting: {}", e);
                    trail.advance(LoopState::Aborted { attempt });
                    return RefinementRun {
                        outcome: RefinementOutcome::Aborted { error: e.into() },
                        attempts,
                        states: trail.states,
                    };
                }
            };
            trail.advance(LoopState::Generated { attempt });

            let candidate = SqlCandidate::new(clean_sql_response(&raw), attempt, question, scope.clone());
            debug!("Candidate {}: {}", attempt, candidate.preview());

            trail.advance(LoopState::Validating { attempt });
            let verdict = self.validator.validate(&candidate, snapshot);

            let (sanitized_sql, row_cap) = match (verdict.sanitized_sql, verdict.row_cap) {
                (Some(sql), Some(cap)) if verdict.allowed => (sql, cap),
                _ => {
                    attempts.push(AttemptRecord {
                        attempt,
                        candidate_sql: candidate.sql,
                        sanitized_sql: None,
                        failure: Some(AttemptFailure::Rejected {
                            violations: verdict.violations,
                        }),
                        transient_retries: 0,
                    });
                    trail.advance(LoopState::Refining { attempt });
                    if let Some(run) = self.exhausted_if_last(attempt, &mut trail, &attempts) {
                        return run;
                    }
                    continue;
                }
            };

            trail.advance(LoopState::Executing { attempt });
            let timeout = self.config.statement_timeout;
            let runner = &self.runner;
            let sql_ref = sanitized_sql.as_str();
            let (outcome, retries) = self
                .config
                .transient_retry
                .run(move || runner.execute(sql_ref, timeout))
                .await;

            match outcome {
                Ok(result) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        candidate_sql: candidate.sql,
                        sanitized_sql: Some(sanitized_sql.clone()),
                        failure: None,
                        transient_retries: retries,
                    });
                    trail.advance(LoopState::Succeeded { attempt });
                    info!("✅ Query succeeded on attempt {}", attempt);
                    return RefinementRun {
                        outcome: RefinementOutcome::Succeeded {
                            final_sql: sanitized_sql,
                            row_cap,
                            result,
                        },
                        attempts,
                        states: trail.states,
                    };
                }
                Err(error) if error.is_transient() => {
                    attempts.push(AttemptRecord {
                        attempt,
                        candidate_sql: candidate.sql,
                        sanitized_sql: Some(sanitized_sql),
                        failure: Some(AttemptFailure::Execution(error.clone())),
                        transient_retries: retries,
                    });
                    warn!("Transient failure persisted after {} retries: {}", retries, error.message);
                    trail.advance(LoopState::Aborted { attempt });
                    return RefinementRun {
                        outcome: RefinementOutcome::Aborted { error: error.into() },
                        attempts,
                        states: trail.states,
                    };
                }
                Err(error) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        candidate_sql: candidate.sql,
                        sanitized_sql: Some(sanitized_sql),
                        failure: Some(AttemptFailure::Execution(error)),
                        transient_retries: retries,
                    });
                    trail.advance(LoopState::Refining { attempt });
                    if let Some(run) = self.exhausted_if_last(attempt, &mut trail, &attempts) {
                        return run;
                    }
                }
            }
        }

        // max_attempts >= 1 and every iteration returns or pushes a failed record.
        let last = attempts
            .last()
            .and_then(|a| a.failure.clone())
            .unwrap_or(AttemptFailure::Rejected { violations: Vec::new() });
        RefinementRun {
            outcome: RefinementOutcome::ExhaustedFailed { last },
            attempts,
            states: trail.states,
        }
    }

    fn exhausted_if_last(
        &self,
        attempt: u32,
        trail: &mut StateTrail,
        attempts: &[AttemptRecord],
    ) -> Option<RefinementRun> {
        if attempt < self.config.max_attempts {
            return None;
        }
        let last = attempts.last().and_then(|a| a.failure.clone())?;
        warn!("Refinement exhausted after {} attempts; last failure: {}", attempt, last.label());
        trail.advance(LoopState::ExhaustedFailed { attempts: attempt });
        Some(RefinementRun {
            outcome: RefinementOutcome::ExhaustedFailed { last },
            attempts: attempts.to_vec(),
            states: std::mem::take(&mut trail.states),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use crate::schema::TableShape;
    use crate::validation::ViolationCode;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedGenerator {
        responses: Mutex<Vec<Result<String, GenerationError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SqlGenerator for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(request.prompt.user.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(GenerationError("script exhausted".to_string()));
            }
            responses.remove(0)
        }
    }

    struct ScriptedRunner {
        outcomes: Mutex<Vec<Result<ExecutionResult, ExecutionError>>>,
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryRunner for ScriptedRunner {
        async fn execute(&self, sql: &str, _timeout: Duration) -> Result<ExecutionResult, ExecutionError> {
            self.executed.lock().unwrap().push(sql.to_string());
            self.outcomes.lock().unwrap().remove(0)
        }
    }

    fn fixture() -> (DatasetScope, SchemaSnapshot, UserContext) {
        let scope = DatasetScope::new(1, "Sales Analytics", "sales_data", vec!["products".to_string()]);
        let snapshot = SchemaSnapshot::new(
            1,
            "Sales Analytics",
            "sales_data",
            vec![TableShape::new("products", 3).with_column("name", "text")],
        );
        (scope, snapshot, UserContext::new(7, "analyst"))
    }

    fn config() -> RefinementConfig {
        RefinementConfig {
            max_attempts: 2,
            transient_retry: RetryPolicy::immediate(1),
            ..RefinementConfig::default()
        }
    }

    fn rows() -> ExecutionResult {
        ExecutionResult::from_json_rows(vec![json!({"name": "Widget"})], 10_000, Duration::from_millis(3))
    }

    #[tokio::test]
    async fn test_rejection_then_success_feeds_back_failure() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("SELECT password FROM sales_data.products".to_string()),
            Ok("```sql\nSELECT name FROM sales_data.products\n```".to_string()),
        ]));
        let runner = Arc::new(ScriptedRunner {
            outcomes: Mutex::new(vec![Ok(rows())]),
            executed: Mutex::new(Vec::new()),
        });
        let refinement = RefinementLoop::new(generator.clone(), runner.clone(), SqlValidator::default(), config());
        let (scope, snapshot, user) = fixture();

        let run = refinement.run("names", &scope, &snapshot, &user).await;

        assert!(matches!(run.outcome, RefinementOutcome::Succeeded { .. }));
        assert_eq!(run.attempts.len(), 2);
        assert_eq!(run.attempts[0].failure.as_ref().unwrap().codes(), vec![ViolationCode::UnauthorizedReference]);
        assert_eq!(run.final_state(), Some(&LoopState::Succeeded { attempt: 2 }));

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[1].contains("SELECT password FROM sales_data.products"));
        assert_eq!(
            runner.executed.lock().unwrap().as_slice(),
            ["SELECT name FROM sales_data.products LIMIT 10000"]
        );
    }

    #[tokio::test]
    async fn test_generation_retried_once_then_aborts() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Err(GenerationError("503".to_string())),
            Err(GenerationError("503".to_string())),
            Ok("SELECT name FROM sales_data.products".to_string()),
        ]));
        let runner = Arc::new(ScriptedRunner {
            outcomes: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
        });
        let refinement = RefinementLoop::new(generator.clone(), runner, SqlValidator::default(), config());
        let (scope, snapshot, user) = fixture();

        let run = refinement.run("names", &scope, &snapshot, &user).await;

        assert!(matches!(
            run.outcome,
            RefinementOutcome::Aborted { error: GatewayError::Generation(_) }
        ));
        assert_eq!(generator.prompts.lock().unwrap().len(), 2);
        assert!(run.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_error_consumes_attempt() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("SELECT name FROM sales_data.products".to_string()),
            Ok("SELECT name FROM sales_data.products ORDER BY name".to_string()),
        ]));
        let runner = Arc::new(ScriptedRunner {
            outcomes: Mutex::new(vec![
                Err(ExecutionError::permanent("[42883] function does not exist")),
                Err(ExecutionError::permanent("[42883] function does not exist")),
            ]),
            executed: Mutex::new(Vec::new()),
        });
        let refinement = RefinementLoop::new(generator, runner, SqlValidator::default(), config());
        let (scope, snapshot, user) = fixture();

        let run = refinement.run("names", &scope, &snapshot, &user).await;

        match run.outcome {
            RefinementOutcome::ExhaustedFailed { ref last } => {
                assert_eq!(last.label(), "Permanent execution error")
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(run.final_state(), Some(&LoopState::ExhaustedFailed { attempts: 2 }));
    }
}
