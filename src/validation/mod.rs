//! Constraint engine: evaluates shape rules and produces verdicts.

mod engine;
mod run;

pub use engine::{render_message, select_targets, ConstraintEngine, ValidationScope};
pub use run::{RunState, ValidationRun};
