//! Thinking steps - the staged "reasoning in progress" indicator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a thinking step.
pub type StepId = Uuid;

/// Pipeline stages, in their fixed total order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingStage {
    Analysis,
    Research,
    Reasoning,
    Execution,
}

impl ThinkingStage {
    pub const ALL: [ThinkingStage; 4] = [
        ThinkingStage::Analysis,
        ThinkingStage::Research,
        ThinkingStage::Reasoning,
        ThinkingStage::Execution,
    ];

    pub fn default_title(&self) -> &'static str {
        match self {
            Self::Analysis => "Analyzing your request",
            Self::Research => "Gathering information",
            Self::Reasoning => "Processing information",
            Self::Execution => "Generating response",
        }
    }

    pub fn default_description(&self) -> &'static str {
        match self {
            Self::Analysis => "Understanding the context and requirements",
            Self::Research => "Searching relevant knowledge and data",
            Self::Reasoning => "Applying logic and reasoning",
            Self::Execution => "Creating comprehensive answer",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Active,
    Completed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ThinkingStep {
    pub id: StepId,
    pub stage: ThinkingStage,
    pub title: String,
    pub description: String,
    pub status: StepStatus,
    /// Time of the last status change.
    pub timestamp: DateTime<Utc>,
}

impl ThinkingStep {
    pub fn pending(stage: ThinkingStage) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage,
            title: stage.default_title().to_string(),
            description: stage.default_description().to_string(),
            status: StepStatus::Pending,
            timestamp: Utc::now(),
        }
    }

    /// The four steps of one pipeline run, all pending, in stage order.
    pub fn full_set() -> Vec<ThinkingStep> {
        ThinkingStage::ALL.iter().map(|s| Self::pending(*s)).collect()
    }

    pub fn is_active(&self) -> bool {
        self.status == StepStatus::Active
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    pub(crate) fn with_status(&self, status: StepStatus) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            ..self.clone()
        }
    }
}

/// Edits to a step's text. Status is deliberately absent: it only changes
/// through pipeline transitions.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StepUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ThinkingStep {
    pub fn apply(&self, update: &StepUpdate) -> Self {
        let mut next = self.clone();
        if let Some(title) = &update.title {
            next.title = title.clone();
        }
        if let Some(description) = &update.description {
            next.description = description.clone();
        }
        next
    }

    pub fn activated(&self) -> Self {
        self.with_status(StepStatus::Active)
    }

    pub fn completed(&self) -> Self {
        self.with_status(StepStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_set_is_ordered_and_pending() {
        let steps = ThinkingStep::full_set();
        let stages: Vec<_> = steps.iter().map(|s| s.stage).collect();
        assert_eq!(stages, ThinkingStage::ALL.to_vec());
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(steps[0].title, "Analyzing your request");
    }

    #[test]
    fn stages_have_total_order() {
        assert!(ThinkingStage::Analysis < ThinkingStage::Research);
        assert!(ThinkingStage::Reasoning < ThinkingStage::Execution);
    }

    #[test]
    fn apply_update_only_touches_text() {
        let step = ThinkingStep::pending(ThinkingStage::Research).activated();
        let updated = step.apply(&StepUpdate {
            title: Some("Reading docs".into()),
            description: None,
        });
        assert_eq!(updated.title, "Reading docs");
        assert_eq!(updated.description, step.description);
        assert_eq!(updated.status, StepStatus::Active);
    }
}
