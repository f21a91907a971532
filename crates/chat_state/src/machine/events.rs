//! Pipeline events - inputs that drive a thinking pipeline run

use serde::{Deserialize, Serialize};

/// Events that can move a pipeline run between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Begin the run; activates the first stage.
    Start,

    /// Complete the active stage and activate the next one.
    Advance,

    /// Complete every remaining stage in order.
    Finish,

    /// Stop the run. The active stage completes, later ones stay pending.
    Cancel,
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Advance => "advance",
            Self::Finish => "finish",
            Self::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
