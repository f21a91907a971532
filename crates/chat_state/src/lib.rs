//! chat_state - Thinking pipeline state machine
//!
//! This crate provides the four-stage "reasoning in progress" indicator:
//! the run state machine, the tick sources that pace it, and the handle
//! that runs it in the background.

pub mod machine;
pub mod pipeline;
pub mod ticker;

// Re-export commonly used types
pub use machine::{PipelineError, PipelineEvent, PipelineRun, RunState, StepTransition};
pub use pipeline::{PipelineHandle, ThinkingPipeline};
pub use ticker::{IntervalTicker, ManualTicker, TickSource, Ticker};
