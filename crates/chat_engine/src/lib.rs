//! chat_engine - Send orchestration for chat sessions
//!
//! - `stream` - StreamingAggregator folding fragments into a message
//! - `controller` - ChatController, the only entry point for a send
//! - `config` - settings taken from `chat_core::Config`

pub mod config;
pub mod controller;
pub mod error;
pub mod stream;

pub use config::EngineConfig;
pub use controller::{ChatController, SendHandle, SendOutcome};
pub use error::{ChatError, Result};
pub use stream::{StreamHandle, StreamOutcome, StreamTarget, StreamingAggregator};
