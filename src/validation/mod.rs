//! Candidate SQL validation.

mod bounding;
pub mod functions;
pub mod lexical;
mod scope_check;
pub mod validator;
pub mod verdict;

pub use scope_check::UnqualifiedTablePolicy;
pub use validator::{validate_sql, SqlValidator, ValidatorConfig};
pub use verdict::{RowCapAdjustment, ValidationStage, ValidationVerdict, Violation, ViolationCode};
