//! Chat engine error types

use chat_core::{MessageId, SessionId};
use session_manager::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session {0} already has a reply in progress")]
    Concurrency(SessionId),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Message {0} is not streaming")]
    NotStreaming(MessageId),

    #[error("Message {0} already has an attached stream")]
    AlreadyAttached(MessageId),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ChatError {
    /// Map a store error onto the caller-facing taxonomy.
    pub(crate) fn from_store(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => Self::SessionNotFound(id),
            SessionError::Validation(msg) => Self::Validation(msg),
            SessionError::StreamInProgress { session_id, .. } => Self::Concurrency(session_id),
            other => Self::Session(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
