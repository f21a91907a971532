//! State machine module
//!
//! Contains the FSM for a single thinking pipeline run.

mod events;
mod states;
mod transitions;

pub use events::PipelineEvent;
pub use states::RunState;
pub use transitions::{PipelineError, PipelineRun, StepTransition};
