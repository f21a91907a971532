//! Run states - lifecycle of a single thinking pipeline run

use serde::{Deserialize, Serialize};

/// Lifecycle of a pipeline run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, no step active yet.
    #[default]
    Ready,

    /// Exactly one step is active.
    Running,

    /// Every step completed.
    Completed,

    /// Stopped early. No step is active.
    Cancelled,
}

impl RunState {
    /// Whether the run has ended and accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}
