//! Session manager error types

use chat_core::{MessageId, SessionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session {session_id} already has a streaming message ({message_id})")]
    StreamInProgress {
        session_id: SessionId,
        message_id: MessageId,
    },

    #[error("Slug already in use: {0}")]
    DuplicateSlug(String),

    #[error("Message already exists: {0}")]
    DuplicateMessage(MessageId),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
