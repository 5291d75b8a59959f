pub mod audit;
pub mod candidate;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod prompt;
pub mod refinement;
pub mod schema;
pub mod scope;
pub mod validation;

pub use audit::{AuditRecord, AuditSink, AuditStatus, InMemoryAuditLog};
pub use candidate::SqlCandidate;
pub use config::GatewayConfig;
pub use error::{ExecutionError, ExecutionErrorKind, GatewayError, GenerationError, Result};
pub use execution::{ExecutionResult, QueryRunner};
pub use llm::{GenerationRequest, SqlGenerator};
pub use pipeline::{PipelineResult, PipelineStatus, QueryGateway};
pub use prompt::{Prompt, PromptComposer};
pub use refinement::{RefinementConfig, RefinementLoop};
pub use schema::{SchemaCatalog, SchemaSnapshot, SchemaSource, TableShape};
pub use scope::{DatasetScope, UserContext};
pub use validation::{SqlValidator, ValidationVerdict, ValidatorConfig, ViolationCode};
