//! Folds a fragment stream into one streaming assistant message.
//!
//! Fragments are written through [`SessionStore::update_message`] in arrival
//! order by a single task per message. Cancellation clears `is_streaming`
//! before returning; any fragment still in flight is then dropped by the
//! message's one-shot streaming flag.

use std::sync::Arc;

use chat_core::{MessageId, MessagePatch, SessionId};
use chat_llm::{ErrorKind, LLMChunk, LLMStream};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use session_manager::SessionStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};

/// The message a stream writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub session_id: SessionId,
    pub message_id: MessageId,
}

impl StreamTarget {
    pub fn new(session_id: SessionId, message_id: MessageId) -> Self {
        Self {
            session_id,
            message_id,
        }
    }
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Source exhausted; the message was finalized.
    Completed { fragments: usize, chars: usize },
    /// Source failed; the message carries the error and its partial content.
    Failed { kind: ErrorKind, error: String },
    /// Cancelled, or the message was finalized or removed by someone else.
    Cancelled,
}

/// Called once with the outcome just before the message is finalized.
pub type FinalizeHook = Box<dyn FnOnce(&StreamOutcome) + Send>;

#[derive(Clone)]
pub struct StreamingAggregator {
    store: Arc<SessionStore>,
    active: Arc<DashMap<MessageId, CancellationToken>>,
}

impl StreamingAggregator {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Start folding `source` into the target message.
    ///
    /// The message must exist and still be streaming, and must not already
    /// have a stream attached.
    pub fn attach(&self, target: StreamTarget, source: LLMStream) -> Result<StreamHandle> {
        self.attach_with(target, source, None)
    }

    /// Like [`attach`](Self::attach), running `before_finalize` right before
    /// the message is finalized by the stream task.
    pub fn attach_with(
        &self,
        target: StreamTarget,
        source: LLMStream,
        before_finalize: Option<FinalizeHook>,
    ) -> Result<StreamHandle> {
        let token = CancellationToken::new();

        match self.active.entry(target.message_id) {
            Entry::Occupied(_) => return Err(ChatError::AlreadyAttached(target.message_id)),
            Entry::Vacant(slot) => {
                let message = self
                    .store
                    .message(target.session_id, target.message_id)
                    .ok_or(ChatError::MessageNotFound(target.message_id))?;
                if !message.is_streaming {
                    return Err(ChatError::NotStreaming(target.message_id));
                }
                slot.insert(token.clone());
            }
        }

        tracing::debug!(
            session_id = %target.session_id,
            message_id = %target.message_id,
            "Stream attached"
        );

        let task = tokio::spawn(consume(
            self.store.clone(),
            self.active.clone(),
            target,
            source,
            token.clone(),
            before_finalize,
        ));

        Ok(StreamHandle {
            target,
            token,
            aggregator: self.clone(),
            task,
        })
    }

    /// Stop the stream feeding `target` and clear `is_streaming`.
    ///
    /// Returns whether a stream was attached.
    pub fn cancel(&self, target: StreamTarget) -> bool {
        let attached = match self.active.remove(&target.message_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        };
        self.store
            .update_message(target.session_id, target.message_id, &MessagePatch::finish());

        if attached {
            tracing::debug!(
                session_id = %target.session_id,
                message_id = %target.message_id,
                "Stream cancelled"
            );
        }
        attached
    }

    pub fn is_active(&self, message_id: MessageId) -> bool {
        self.active.contains_key(&message_id)
    }
}

/// Handle to one attached stream.
pub struct StreamHandle {
    target: StreamTarget,
    token: CancellationToken,
    aggregator: StreamingAggregator,
    task: JoinHandle<StreamOutcome>,
}

impl StreamHandle {
    pub fn target(&self) -> StreamTarget {
        self.target
    }

    /// Cancel this stream; see [`StreamingAggregator::cancel`].
    pub fn cancel(&self) -> bool {
        self.aggregator.cancel(self.target)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the stream to end.
    pub async fn finished(self) -> StreamOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(message_id = %self.target.message_id, error = %e, "Stream task failed");
                StreamOutcome::Cancelled
            }
        }
    }
}

async fn consume(
    store: Arc<SessionStore>,
    active: Arc<DashMap<MessageId, CancellationToken>>,
    target: StreamTarget,
    mut source: LLMStream,
    token: CancellationToken,
    before_finalize: Option<FinalizeHook>,
) -> StreamOutcome {
    let StreamTarget {
        session_id,
        message_id,
    } = target;
    let mut fragments = 0usize;
    let mut chars = 0usize;

    let (outcome, patch) = loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break (StreamOutcome::Cancelled, None),
            next = source.next() => next,
        };

        match next {
            Some(Ok(LLMChunk::Token(text))) => {
                if text.is_empty() {
                    continue;
                }
                match store.update_message(session_id, message_id, &MessagePatch::append(text.as_str())) {
                    Some(message) if message.is_streaming => {
                        fragments += 1;
                        chars += text.chars().count();
                    }
                    // Finalized elsewhere, or the session is gone.
                    _ => break (StreamOutcome::Cancelled, None),
                }
            }
            Some(Ok(LLMChunk::Done)) | None => {
                break (
                    StreamOutcome::Completed { fragments, chars },
                    Some(MessagePatch::finish()),
                )
            }
            Some(Err(e)) => {
                tracing::warn!(
                    session_id = %session_id,
                    message_id = %message_id,
                    fragments,
                    error = %e,
                    "Stream failed"
                );
                let error = e.to_string();
                break (
                    StreamOutcome::Failed {
                        kind: e.kind(),
                        error: error.clone(),
                    },
                    Some(MessagePatch::fail(error)),
                );
            }
        }
    };

    if let Some(hook) = before_finalize {
        hook(&outcome);
    }
    if let Some(patch) = patch {
        store.update_message(session_id, message_id, &patch);
    }
    // A finalized message cannot be re-attached, so the entry is still ours.
    active.remove(&message_id);

    tracing::debug!(
        session_id = %session_id,
        message_id = %message_id,
        outcome = ?outcome,
        "Stream finished"
    );
    outcome
}
