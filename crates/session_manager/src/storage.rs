//! Session storage trait and implementations
//!
//! Storage is an external collaborator: durable and eventually consistent.
//! Nothing here retries; callers log failures and move on.

use crate::error::{Result, SessionError};
use async_trait::async_trait;
use chat_core::{ChatSession, SessionId};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Session storage trait
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Load every session owned by a user
    async fn load_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>>;

    /// Save (create or overwrite) a session
    async fn save_session(&self, user_id: &str, session: &ChatSession) -> Result<()>;

    /// Delete a session. Deleting a missing session succeeds.
    async fn delete_session(&self, user_id: &str, session_id: SessionId) -> Result<()>;
}

/// File-based session storage: `<base>/<user_id>/<session_id>.json`
#[derive(Clone)]
pub struct FileSessionStorage {
    base_path: PathBuf,
}

impl FileSessionStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        let valid = !user_id.is_empty()
            && user_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && user_id != "."
            && user_id != "..";
        if !valid {
            return Err(SessionError::Validation(format!(
                "invalid user id for storage: {user_id:?}"
            )));
        }
        Ok(self.base_path.join(user_id))
    }

    fn session_path(&self, user_id: &str, session_id: SessionId) -> Result<PathBuf> {
        Ok(self.user_dir(user_id)?.join(format!("{}.json", session_id)))
    }
}

#[async_trait]
impl SessionStorage for FileSessionStorage {
    async fn load_sessions(&self, user_id: &str) -> Result<Vec<ChatSession>> {
        let dir = self.user_dir(user_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let contents = fs::read_to_string(&path).await?;
            match serde_json::from_str::<ChatSession>(&contents) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                }
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn save_session(&self, user_id: &str, session: &ChatSession) -> Result<()> {
        let dir = self.user_dir(user_id)?;
        fs::create_dir_all(&dir).await?;

        let path = self.session_path(user_id, session.id)?;
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(session)?;

        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &path).await?;

        Ok(())
    }

    async fn delete_session(&self, user_id: &str, session_id: SessionId) -> Result<()> {
        let path = self.session_path(user_id, session_id)?;

        if path.exists() {
            fs::remove_file(&path).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::{ChatMessage, NewSession};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_storage_save_and_load() {
        let dir = tempdir().unwrap();
        let storage = FileSessionStorage::new(dir.path());

        let mut session = NewSession::new("model-x").with_title("Saved").build();
        session.messages.push(ChatMessage::user("hello"));
        storage.save_session("alice", &session).await.unwrap();

        let loaded = storage.load_sessions("alice").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], session);
    }

    #[tokio::test]
    async fn test_file_storage_users_are_isolated() {
        let dir = tempdir().unwrap();
        let storage = FileSessionStorage::new(dir.path());

        let session = NewSession::new("m").build();
        storage.save_session("alice", &session).await.unwrap();

        assert!(storage.load_sessions("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_storage_delete() {
        let dir = tempdir().unwrap();
        let storage = FileSessionStorage::new(dir.path());

        let session = NewSession::new("m").build();
        storage.save_session("alice", &session).await.unwrap();
        storage.delete_session("alice", session.id).await.unwrap();
        // Second delete is a no-op.
        storage.delete_session("alice", session.id).await.unwrap();

        assert!(storage.load_sessions("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_storage_skips_corrupt_files() {
        let dir = tempdir().unwrap();
        let storage = FileSessionStorage::new(dir.path());

        let session = NewSession::new("m").build();
        storage.save_session("alice", &session).await.unwrap();
        std::fs::write(dir.path().join("alice").join("broken.json"), "{ nope").unwrap();

        let loaded = storage.load_sessions("alice").await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_file_storage_rejects_path_like_user_ids() {
        let dir = tempdir().unwrap();
        let storage = FileSessionStorage::new(dir.path());

        for user in ["", "..", "../etc", "a/b"] {
            let result = storage.load_sessions(user).await;
            assert!(matches!(result, Err(SessionError::Validation(_))), "{user:?}");
        }
    }
}
