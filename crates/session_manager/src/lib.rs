//! # Session Manager
//!
//! Owns chat sessions and their messages in memory, and mirrors them into a
//! persistence collaborator.

pub mod error;
pub mod events;
pub mod persister;
pub mod storage;
pub mod store;

// Re-exports
pub use error::{Result, SessionError};
pub use events::StoreEvent;
pub use persister::{hydrate, SessionPersister};
pub use storage::{FileSessionStorage, SessionStorage};
pub use store::SessionStore;
