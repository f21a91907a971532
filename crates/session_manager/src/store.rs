//! In-memory session store
//!
//! The store is the single owner of every [`ChatSession`] and its messages.
//! Sessions are held as `Arc<ChatSession>` and replaced copy-on-write, so
//! readers get immutable snapshots while writers never block on them.

use std::sync::Arc;

use chat_core::{ChatMessage, ChatSession, MessageId, MessagePatch, NewSession, SessionId};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::{Result, SessionError};
use crate::events::StoreEvent;

const EVENT_CAPACITY: usize = 1024;

pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<ChatSession>>,
    slugs: DashMap<String, SessionId>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sessions: DashMap::new(),
            slugs: DashMap::new(),
            events,
        }
    }

    /// Subscribe to committed mutations.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ========== Sessions ==========

    /// Create a session from its initial values.
    pub fn create_session(&self, initial: NewSession) -> Arc<ChatSession> {
        let mut session = initial.build();
        loop {
            match self.slugs.entry(session.slug.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(session.id);
                    break;
                }
                Entry::Occupied(_) => {
                    session.slug = format!("{}-{}", session.slug, session.id.simple());
                }
            }
        }

        let session = Arc::new(session);
        self.sessions.insert(session.id, Arc::clone(&session));

        tracing::info!(
            session_id = %session.id,
            slug = %session.slug,
            model = %session.model,
            "SessionStore: session created"
        );
        self.emit(StoreEvent::SessionCreated {
            session_id: session.id,
        });
        session
    }

    /// Insert a session loaded from persistence.
    ///
    /// A message that was still streaming when the session was saved can never
    /// resume, so it is finalized with an error here.
    pub fn insert(&self, mut session: ChatSession) -> Result<Arc<ChatSession>> {
        match self.slugs.entry(session.slug.clone()) {
            Entry::Occupied(existing) if *existing.get() != session.id => {
                return Err(SessionError::DuplicateSlug(session.slug));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(session.id);
            }
        }

        for message in session.messages.iter_mut().filter(|m| m.is_streaming) {
            tracing::warn!(
                session_id = %session.id,
                message_id = %message.id,
                "SessionStore: finalizing message left streaming by a previous run"
            );
            *message = message.apply(&MessagePatch::fail("interrupted"));
        }

        let session = Arc::new(session);
        self.sessions.insert(session.id, Arc::clone(&session));
        self.emit(StoreEvent::SessionCreated {
            session_id: session.id,
        });
        Ok(session)
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<ChatSession>> {
        self.sessions.get(&session_id).map(|s| Arc::clone(s.value()))
    }

    pub fn get_by_slug(&self, slug: &str) -> Option<Arc<ChatSession>> {
        let session_id = *self.slugs.get(slug)?.value();
        self.get(session_id)
    }

    /// All sessions, most recently updated first.
    pub fn list(&self) -> Vec<Arc<ChatSession>> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|s| Arc::clone(s.value()))
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Rename a session. Blank titles are rejected and leave the title unchanged.
    pub fn rename_session(&self, session_id: SessionId, title: &str) -> Result<Arc<ChatSession>> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionError::Validation("title must not be blank".into()));
        }

        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        let session = Arc::make_mut(entry.value_mut());
        session.title = title.to_string();
        session.updated_at = Utc::now();
        let snapshot = Arc::clone(entry.value());

        tracing::debug!(session_id = %session_id, title = %title, "SessionStore: session renamed");
        self.emit(StoreEvent::SessionRenamed {
            session_id,
            title: title.to_string(),
        });
        Ok(snapshot)
    }

    /// Remove a session and all of its messages.
    pub fn delete_session(&self, session_id: SessionId) -> Option<Arc<ChatSession>> {
        let (_, session) = self.sessions.remove(&session_id)?;
        self.slugs.remove(&session.slug);

        tracing::info!(
            session_id = %session_id,
            messages = session.messages.len(),
            "SessionStore: session deleted"
        );
        self.emit(StoreEvent::SessionDeleted { session_id });
        Some(session)
    }

    // ========== Messages ==========

    pub fn append_message(&self, session_id: SessionId, message: ChatMessage) -> Result<()> {
        self.append_messages(session_id, vec![message])
    }

    /// Append several messages in one step. Either all are appended or none.
    pub fn append_messages(&self, session_id: SessionId, messages: Vec<ChatMessage>) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;

        let mut streaming = entry.streaming_message().map(|m| m.id);
        for (i, message) in messages.iter().enumerate() {
            if entry.message(message.id).is_some()
                || messages[..i].iter().any(|m| m.id == message.id)
            {
                return Err(SessionError::DuplicateMessage(message.id));
            }
            if message.is_streaming {
                if let Some(message_id) = streaming {
                    return Err(SessionError::StreamInProgress {
                        session_id,
                        message_id,
                    });
                }
                streaming = Some(message.id);
            }
        }

        let session = Arc::make_mut(entry.value_mut());
        session.messages.extend(messages.iter().cloned());
        session.updated_at = Utc::now();

        for message in messages {
            tracing::debug!(
                session_id = %session_id,
                message_id = %message.id,
                role = %message.role,
                "SessionStore: message appended"
            );
            self.emit(StoreEvent::MessageAppended {
                session_id,
                message,
            });
        }
        Ok(())
    }

    /// Apply a partial update to a message.
    ///
    /// Returns the updated message, or `None` when the session or message no
    /// longer exists. A missing target is not an error: late updates for a
    /// deleted session simply have nowhere to land.
    pub fn update_message(
        &self,
        session_id: SessionId,
        message_id: MessageId,
        patch: &MessagePatch,
    ) -> Option<ChatMessage> {
        let Some(mut entry) = self.sessions.get_mut(&session_id) else {
            tracing::trace!(
                session_id = %session_id,
                message_id = %message_id,
                "SessionStore: update for unknown session ignored"
            );
            return None;
        };

        let Some(index) = entry.messages.iter().position(|m| m.id == message_id) else {
            tracing::trace!(
                session_id = %session_id,
                message_id = %message_id,
                "SessionStore: update for unknown message ignored"
            );
            return None;
        };

        let updated = entry.messages[index].apply(patch);
        if updated == entry.messages[index] {
            return Some(updated);
        }

        let session = Arc::make_mut(entry.value_mut());
        session.messages[index] = updated.clone();
        session.updated_at = Utc::now();

        self.emit(StoreEvent::MessageUpdated {
            session_id,
            message: updated.clone(),
        });
        Some(updated)
    }

    pub fn message(&self, session_id: SessionId, message_id: MessageId) -> Option<ChatMessage> {
        self.sessions
            .get(&session_id)?
            .message(message_id)
            .cloned()
    }

    /// The message currently streaming in a session, if any.
    pub fn streaming_message(&self, session_id: SessionId) -> Option<ChatMessage> {
        self.sessions
            .get(&session_id)?
            .streaming_message()
            .cloned()
    }
}
