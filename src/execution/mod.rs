//! Read-only, bounded and timed execution of accepted queries.

pub mod error_classifier;
pub mod executor;
pub mod result;
pub mod retry;

pub use error_classifier::ErrorClassifier;
pub use executor::{PgQueryExecutor, QueryRunner};
pub use result::{ColumnMeta, ColumnType, ExecutionResult};
pub use retry::RetryPolicy;
