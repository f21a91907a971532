//! Message module - conversation entries and their partial updates

mod chat_message;

pub use chat_message::{ChatMessage, MessageId, MessagePatch, Role};
