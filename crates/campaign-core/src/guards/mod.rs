//! Validation guards bounding model-driven steps

pub mod enforcer;
pub mod grader;

pub use enforcer::{Enforcer, EnforcerDecision, EnforcerStatus};
pub use grader::{GradeResult, Grader};
