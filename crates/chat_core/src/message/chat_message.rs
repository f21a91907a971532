//! ChatMessage - a single entry of a chat session
//!
//! Messages are immutable values: every mutation goes through [`MessagePatch`]
//! and produces a new [`ChatMessage`], which the owning store swaps in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a chat message.
pub type MessageId = Uuid;

/// Author of a chat message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message in a conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// True only for an assistant placeholder that is still receiving fragments.
    #[serde(default)]
    pub is_streaming: bool,
    /// Error indicator. Set when the reply failed; partial content is kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatMessage {
    /// A complete user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            is_streaming: false,
            error: None,
        }
    }

    /// An empty assistant message that fragments will be appended into.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: String::new(),
            created_at: Utc::now(),
            is_streaming: true,
            error: None,
        }
    }

    /// A complete assistant message (used when loading history).
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            is_streaming: false,
            content: content.into(),
            ..Self::assistant_placeholder()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Apply a patch, returning the updated message.
    ///
    /// `is_streaming` can only go from `true` to `false`. Content changes are
    /// dropped once streaming has finished, so a fragment that loses the race
    /// against a cancellation never lands.
    pub fn apply(&self, patch: &MessagePatch) -> ChatMessage {
        let mut next = self.clone();

        // Content is frozen once streaming has finished.
        if self.is_streaming {
            if let Some(content) = &patch.content {
                next.content = content.clone();
            }
            if let Some(fragment) = &patch.append {
                next.content.push_str(fragment);
            }
        }

        if let Some(error) = &patch.error {
            next.error = Some(error.clone());
        }

        if patch.finish_streaming {
            next.is_streaming = false;
        }

        next
    }
}

/// Partial update for a [`ChatMessage`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MessagePatch {
    /// Replace the whole content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Append a fragment (applied after `content`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append: Option<String>,
    /// Clear `is_streaming`.
    #[serde(default)]
    pub finish_streaming: bool,
    /// Mark the message as failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessagePatch {
    pub fn append(fragment: impl Into<String>) -> Self {
        Self {
            append: Some(fragment.into()),
            ..Default::default()
        }
    }

    pub fn replace_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn finish() -> Self {
        Self {
            finish_streaming: true,
            ..Default::default()
        }
    }

    /// Finish streaming and record an error in one update.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            finish_streaming: true,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.append.is_none()
            && !self.finish_streaming
            && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_starts_empty_and_streaming() {
        let msg = ChatMessage::assistant_placeholder();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.content.is_empty());
        assert!(msg.is_streaming);
        assert!(!msg.is_error());
    }

    #[test]
    fn apply_returns_new_value_and_keeps_original() {
        let msg = ChatMessage::assistant_placeholder();
        let next = msg.apply(&MessagePatch::append("Hel"));
        assert_eq!(msg.content, "");
        assert_eq!(next.content, "Hel");
        assert_eq!(next.id, msg.id);
    }

    #[test]
    fn append_after_finish_is_ignored() {
        let msg = ChatMessage::assistant_placeholder()
            .apply(&MessagePatch::append("partial"))
            .apply(&MessagePatch::finish());
        let late = msg.apply(&MessagePatch::append(" late"));
        assert_eq!(late.content, "partial");
        assert!(!late.is_streaming);
    }

    #[test]
    fn fail_keeps_partial_content() {
        let msg = ChatMessage::assistant_placeholder()
            .apply(&MessagePatch::append("Hel"))
            .apply(&MessagePatch::fail("upstream returned 502"));
        assert_eq!(msg.content, "Hel");
        assert!(!msg.is_streaming);
        assert_eq!(msg.error.as_deref(), Some("upstream returned 502"));
    }

    #[test]
    fn replace_content_only_while_streaming() {
        let streaming = ChatMessage::assistant_placeholder()
            .apply(&MessagePatch::append("draft"))
            .apply(&MessagePatch::replace_content("rewritten"));
        assert_eq!(streaming.content, "rewritten");

        let done = ChatMessage::assistant("done");
        let patched = done.apply(&MessagePatch::replace_content("edited"));
        assert!(!patched.is_streaming);
        assert_eq!(patched.content, "done");
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert!(MessagePatch::default().is_empty());
    }
}
