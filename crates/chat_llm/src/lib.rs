//! chat_llm - Remote text-generation collaborator
//!
//! The engine talks to a provider through [`LLMProvider`]: either a single
//! response or an [`LLMStream`] of text fragments.

pub mod provider;
pub mod providers;
pub mod types;

pub use provider::{ErrorKind, LLMError, LLMProvider, LLMStream, Result};
pub use providers::{OpenRouterProvider, ScriptedProvider, ScriptedReply};
pub use types::{ChatCompletion, ChatRequest, LLMChunk, PromptMessage, PromptRole, Usage};
