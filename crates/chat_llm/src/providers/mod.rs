//! Provider implementations.

pub mod common;
pub mod openrouter;
pub mod scripted;

pub use openrouter::OpenRouterProvider;
pub use scripted::{ScriptedProvider, ScriptedReply};
