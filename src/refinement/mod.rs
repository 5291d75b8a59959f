//! Bounded regeneration driven by structured failure feedback.

pub mod refinement_loop;
pub mod state;

pub use refinement_loop::{RefinementConfig, RefinementLoop, RefinementOutcome, RefinementRun};
pub use state::{AttemptFailure, AttemptRecord, LoopState};
