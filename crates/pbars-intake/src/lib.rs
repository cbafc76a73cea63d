//! Trace intake state machine (component 4.D): validates step events against
//! a bar's schema and drives each trace through `fresh -> running -> completed | aborted`.

mod engine;
mod events;

pub use engine::{CompletedTrace, CompletedTraceStep, IntakeConfig, IntakeEngine, IntakeOutcome};
pub use events::StepEvent;
