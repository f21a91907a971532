//! Change notifications emitted by the session store

use chat_core::{ChatMessage, SessionId};
use serde::{Deserialize, Serialize};

/// A committed mutation of the store.
///
/// Events are emitted after the new value is visible to readers, so a
/// subscriber that looks the session up again always sees at least this state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    SessionCreated {
        session_id: SessionId,
    },
    MessageAppended {
        session_id: SessionId,
        message: ChatMessage,
    },
    MessageUpdated {
        session_id: SessionId,
        message: ChatMessage,
    },
    SessionRenamed {
        session_id: SessionId,
        title: String,
    },
    SessionDeleted {
        session_id: SessionId,
    },
}

impl StoreEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::SessionCreated { session_id }
            | Self::MessageAppended { session_id, .. }
            | Self::MessageUpdated { session_id, .. }
            | Self::SessionRenamed { session_id, .. }
            | Self::SessionDeleted { session_id } => *session_id,
        }
    }
}
