//! Bridges the in-memory store and the persistence collaborator.

use std::sync::Arc;

use chat_core::SessionId;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::StoreEvent;
use crate::storage::SessionStorage;
use crate::store::SessionStore;

/// Load every stored session of `user_id` into the store.
///
/// Returns the number of sessions inserted. Sessions that clash with ones
/// already in the store are skipped with a warning.
pub async fn hydrate(
    store: &SessionStore,
    storage: &dyn SessionStorage,
    user_id: &str,
) -> Result<usize> {
    let sessions = storage.load_sessions(user_id).await?;
    let mut inserted = 0;
    for session in sessions {
        let session_id = session.id;
        match store.insert(session) {
            Ok(_) => inserted += 1,
            Err(e) => tracing::warn!(session_id = %session_id, error = %e, "Skipping stored session"),
        }
    }
    tracing::info!(user_id = %user_id, sessions = inserted, "Sessions hydrated from storage");
    Ok(inserted)
}

/// Background task that mirrors store mutations into storage.
///
/// Fragment-by-fragment updates are not written; the session is saved when the
/// streaming message is appended and again once it finishes.
pub struct SessionPersister {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionPersister {
    pub fn spawn(
        store: Arc<SessionStore>,
        storage: Arc<dyn SessionStorage>,
        user_id: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        let cancel = CancellationToken::new();
        let mut events = store.subscribe();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => event,
                };
                if !apply(&store, storage.as_ref(), &user_id, event).await {
                    break;
                }
            }

            // Flush what was committed before shutdown.
            loop {
                let event = match events.try_recv() {
                    Ok(event) => Ok(event),
                    Err(TryRecvError::Lagged(skipped)) => Err(RecvError::Lagged(skipped)),
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                };
                apply(&store, storage.as_ref(), &user_id, event).await;
            }
            tracing::debug!(user_id = %user_id, "Session persister stopped");
        });

        Self { cancel, task }
    }

    /// Stop listening once the events already queued are written.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Session persister task failed");
        }
    }
}

/// Returns `false` once the store is gone.
async fn apply(
    store: &SessionStore,
    storage: &dyn SessionStorage,
    user_id: &str,
    event: std::result::Result<StoreEvent, RecvError>,
) -> bool {
    match event {
        Ok(StoreEvent::SessionDeleted { session_id }) => {
            if let Err(e) = storage.delete_session(user_id, session_id).await {
                tracing::error!(session_id = %session_id, error = %e, "Failed to delete stored session");
            }
        }
        Ok(StoreEvent::MessageUpdated { message, .. }) if message.is_streaming => {}
        Ok(event) => save(store, storage, user_id, event.session_id()).await,
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Persister lagged behind store events, resyncing storage");
            resync(store, storage, user_id).await;
        }
        Err(RecvError::Closed) => return false,
    }
    true
}

/// Bring storage in line with the store after events were missed: drop stored
/// sessions the store no longer has, then save every live one.
async fn resync(store: &SessionStore, storage: &dyn SessionStorage, user_id: &str) {
    match storage.load_sessions(user_id).await {
        Ok(stored) => {
            for session in stored.iter().filter(|s| store.get(s.id).is_none()) {
                if let Err(e) = storage.delete_session(user_id, session.id).await {
                    tracing::error!(session_id = %session.id, error = %e, "Failed to delete stored session");
                }
            }
        }
        Err(e) => tracing::error!(user_id = %user_id, error = %e, "Failed to list stored sessions"),
    }
    for session in store.list() {
        save(store, storage, user_id, session.id).await;
    }
}

async fn save(store: &SessionStore, storage: &dyn SessionStorage, user_id: &str, session_id: SessionId) {
    // The session may already be gone; its delete event follows.
    let Some(session) = store.get(session_id) else {
        return;
    };
    if let Err(e) = storage.save_session(user_id, &session).await {
        tracing::error!(session_id = %session_id, error = %e, "Failed to save session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileSessionStorage;
    use chat_core::{ChatMessage, MessagePatch, NewSession};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn persister_saves_and_deletes() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(FileSessionStorage::new(dir.path()));
        let store = Arc::new(SessionStore::new());
        let persister = SessionPersister::spawn(store.clone(), storage.clone(), "alice");

        let session = store.create_session(NewSession::new("m").with_title("Persisted"));
        store.append_message(session.id, ChatMessage::user("hello")).unwrap();

        let s = storage.clone();
        wait_for(|| {
            let s = s.clone();
            async move {
                s.load_sessions("alice")
                    .await
                    .map(|v| v.len() == 1 && v[0].messages.len() == 1)
                    .unwrap_or(false)
            }
        })
        .await;

        store.delete_session(session.id);
        let s = storage.clone();
        wait_for(|| {
            let s = s.clone();
            async move { s.load_sessions("alice").await.map(|v| v.is_empty()).unwrap_or(false) }
        })
        .await;

        persister.shutdown().await;
    }

    #[tokio::test]
    async fn lagged_persister_still_removes_deleted_sessions() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(FileSessionStorage::new(dir.path()));
        let store = Arc::new(SessionStore::new());
        let persister = SessionPersister::spawn(store.clone(), storage.clone(), "alice");

        let doomed = store.create_session(NewSession::new("m").with_title("Doomed"));
        let s = storage.clone();
        wait_for(|| {
            let s = s.clone();
            async move { s.load_sessions("alice").await.map(|v| v.len() == 1).unwrap_or(false) }
        })
        .await;

        // Overflow the event channel without letting the persister run.
        let busy = store.create_session(NewSession::new("m").with_title("Busy"));
        let placeholder = ChatMessage::assistant_placeholder();
        let placeholder_id = placeholder.id;
        store.append_message(busy.id, placeholder).unwrap();
        store.delete_session(doomed.id);
        for _ in 0..2001 {
            store.update_message(busy.id, placeholder_id, &MessagePatch::append("x"));
        }

        persister.shutdown().await;

        let stored = storage.load_sessions("alice").await.unwrap();
        let ids: Vec<_> = stored.iter().map(|s| s.id).collect();
        assert!(!ids.contains(&doomed.id));
        assert_eq!(ids, vec![busy.id]);
        assert_eq!(stored[0].messages[0].content.len(), 2001);
    }

    #[tokio::test]
    async fn hydrate_loads_and_repairs_sessions() {
        let dir = tempdir().unwrap();
        let storage = FileSessionStorage::new(dir.path());

        let mut session = NewSession::new("m").build();
        session.messages.push(ChatMessage::user("hi"));
        let placeholder = ChatMessage::assistant_placeholder().apply(&MessagePatch::append("par"));
        session.messages.push(placeholder);
        storage.save_session("alice", &session).await.unwrap();

        let store = SessionStore::new();
        let count = hydrate(&store, &storage, "alice").await.unwrap();
        assert_eq!(count, 1);

        let loaded = store.get(session.id).unwrap();
        assert!(loaded.streaming_message().is_none());
        assert_eq!(loaded.messages[1].content, "par");
        assert!(loaded.messages[1].is_error());
    }
}
