//! chat_core - Core types for the chat session engine
//!
//! This crate provides the foundational types used across all chat crates:
//! - `message` - ChatMessage, Role and copy-on-write MessagePatch
//! - `session` - ChatSession, NewSession and slug/title derivation
//! - `thinking` - ThinkingStep and the fixed stage order
//! - `config` - runtime configuration loaded from file and environment

pub mod config;
pub mod message;
pub mod paths;
pub mod session;
pub mod thinking;

// Re-export commonly used types
pub use config::Config;
pub use message::{ChatMessage, MessageId, MessagePatch, Role};
pub use session::{ChatSession, NewSession, SessionId};
pub use thinking::{StepId, StepStatus, StepUpdate, ThinkingStage, ThinkingStep};
