//! Pipeline transitions - FSM transition logic for a thinking pipeline run
//!
//! A run owns the four thinking steps and moves them through
//! `pending -> active -> completed` strictly in stage order.

use chat_core::{StepId, StepUpdate, ThinkingStage, ThinkingStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::events::PipelineEvent;
use super::states::RunState;

const MAX_HISTORY: usize = 50;

/// Error type for rejected pipeline operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Pipeline run has already ended: {0:?}")]
    AlreadyFinished(RunState),

    #[error("Pipeline run has not been started")]
    NotStarted,

    #[error("Thinking step not found: {0}")]
    StepNotFound(StepId),
}

/// Represents a pipeline transition result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTransition {
    /// The event that triggered the transition.
    pub event: PipelineEvent,
    /// Active stage before the transition.
    pub from: Option<ThinkingStage>,
    /// Active stage after the transition.
    pub to: Option<ThinkingStage>,
    /// Run state after the transition.
    pub state: RunState,
    /// Whether anything actually changed.
    pub changed: bool,
    pub at: DateTime<Utc>,
}

/// One execution of the four-stage thinking pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    id: Uuid,
    steps: Vec<ThinkingStep>,
    /// Index of the active step.
    active: Option<usize>,
    state: RunState,
    history: Vec<StepTransition>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    /// Create a run with all four steps pending.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            steps: ThinkingStep::full_set(),
            active: None,
            state: RunState::Ready,
            history: Vec::new(),
        }
    }

    /// Create a run that is already started.
    pub fn started() -> Self {
        let mut run = Self::new();
        run.activate(0);
        run.state = RunState::Running;
        run
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn steps(&self) -> &[ThinkingStep] {
        &self.steps
    }

    pub fn step(&self, step_id: StepId) -> Option<&ThinkingStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn active_step(&self) -> Option<&ThinkingStep> {
        self.active.and_then(|i| self.steps.get(i))
    }

    pub fn active_stage(&self) -> Option<ThinkingStage> {
        self.active_step().map(|s| s.stage)
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Get the transition history.
    pub fn history(&self) -> &[StepTransition] {
        &self.history
    }

    /// Whether step statuses form a completed prefix, at most one active
    /// step, then pending steps.
    pub fn is_well_ordered(&self) -> bool {
        let mut seen_active = false;
        let mut seen_pending = false;
        for step in &self.steps {
            if step.is_completed() {
                if seen_active || seen_pending {
                    return false;
                }
            } else if step.is_active() {
                if seen_active || seen_pending {
                    return false;
                }
                seen_active = true;
            } else {
                seen_pending = true;
            }
        }
        true
    }

    /// Handle an event and transition to a new state.
    pub fn handle_event(&mut self, event: PipelineEvent) -> Result<StepTransition, PipelineError> {
        if self.state.is_terminal() {
            return Err(PipelineError::AlreadyFinished(self.state));
        }

        let from = self.active_stage();
        let before = self.state;

        match event {
            PipelineEvent::Start => {
                if self.state == RunState::Ready {
                    self.activate(0);
                    self.state = RunState::Running;
                }
            }
            PipelineEvent::Advance => {
                let Some(current) = self.active else {
                    return Err(PipelineError::NotStarted);
                };
                self.complete(current);
                if current + 1 < self.steps.len() {
                    self.activate(current + 1);
                } else {
                    self.active = None;
                    self.state = RunState::Completed;
                }
            }
            PipelineEvent::Finish => {
                for i in 0..self.steps.len() {
                    if !self.steps[i].is_completed() {
                        self.complete(i);
                    }
                }
                self.active = None;
                self.state = RunState::Completed;
            }
            PipelineEvent::Cancel => {
                if let Some(current) = self.active.take() {
                    self.complete(current);
                }
                self.state = RunState::Cancelled;
            }
        }

        let to = self.active_stage();
        let transition = StepTransition {
            event,
            from,
            to,
            state: self.state,
            changed: from != to || before != self.state,
            at: Utc::now(),
        };

        // Add to history
        self.history.push(transition.clone());
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }

        Ok(transition)
    }

    /// Edit the title or description of the step with the given id.
    pub fn update_step(
        &mut self,
        step_id: StepId,
        update: &StepUpdate,
    ) -> Result<&ThinkingStep, PipelineError> {
        let index = self
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or(PipelineError::StepNotFound(step_id))?;
        self.steps[index] = self.steps[index].apply(update);
        Ok(&self.steps[index])
    }

    fn activate(&mut self, index: usize) {
        self.steps[index] = self.steps[index].activated();
        self.active = Some(index);
    }

    fn complete(&mut self, index: usize) {
        self.steps[index] = self.steps[index].completed();
    }
}
