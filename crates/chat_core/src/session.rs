//! ChatSession - an ordered conversation with a stable slug

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{ChatMessage, MessageId};

/// Identifier of a chat session.
pub type SessionId = Uuid;

const MAX_TITLE_CHARS: usize = 48;
const MAX_SLUG_STEM_CHARS: usize = 40;
const FALLBACK_TITLE: &str = "New chat";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatSession {
    pub id: SessionId,
    /// Unique and immutable once created.
    pub slug: String,
    pub title: String,
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn message(&self, message_id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// The message currently receiving fragments, if any.
    pub fn streaming_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.is_streaming)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming_message().is_some()
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

/// Initial values for a new session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub title: Option<String>,
    pub model: String,
    pub user_id: Option<String>,
    /// Used to derive a title when none is given.
    pub first_message: Option<String>,
}

impl NewSession {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_first_message(mut self, content: impl Into<String>) -> Self {
        self.first_message = Some(content.into());
        self
    }

    /// Build the session value. The slug is derived once here and never again.
    pub fn build(self) -> ChatSession {
        let id = Uuid::new_v4();
        let title = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| self.first_message.as_deref().and_then(title_from_message))
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());
        let slug = slug_for(&title, id);
        let now = Utc::now();

        ChatSession {
            id,
            slug,
            title,
            model: self.model,
            messages: Vec::new(),
            user_id: self.user_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derive a title from the first line of a message.
pub fn title_from_message(content: &str) -> Option<String> {
    let line = content.lines().map(str::trim).find(|l| !l.is_empty())?;
    if line.chars().count() <= MAX_TITLE_CHARS {
        return Some(line.to_string());
    }
    let truncated: String = line.chars().take(MAX_TITLE_CHARS).collect();
    Some(format!("{}…", truncated.trim_end()))
}

/// Kebab-case stem of the title plus the first 8 hex chars of the id.
pub fn slug_for(title: &str, id: SessionId) -> String {
    let mut stem = String::new();
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !stem.is_empty() {
                stem.push('-');
            }
            pending_dash = false;
            stem.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if stem.len() >= MAX_SLUG_STEM_CHARS {
            break;
        }
    }

    let suffix: String = id.simple().to_string().chars().take(8).collect();
    if stem.is_empty() {
        format!("chat-{suffix}")
    } else {
        format!("{}-{suffix}", stem.trim_end_matches('-'))
    }
}
