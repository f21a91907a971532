//! Send orchestration
//!
//! [`ChatController`] is the only place a reply is started. A send appends the
//! user message and an assistant placeholder, launches a thinking pipeline,
//! asks the provider for a reply and routes it through the
//! [`StreamingAggregator`] into the placeholder.

use std::sync::Arc;

use chat_core::{ChatMessage, ChatSession, MessageId, MessagePatch, NewSession, Role, SessionId};
use chat_llm::{ChatRequest, ErrorKind, LLMChunk, LLMProvider, LLMStream, PromptMessage};
use chat_state::{PipelineHandle, PipelineRun, ThinkingPipeline};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream;
use session_manager::SessionStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{ChatError, Result};
use crate::stream::{FinalizeHook, StreamOutcome, StreamTarget, StreamingAggregator};

/// Bookkeeping for the one reply a session may have in progress.
struct InFlight {
    message_id: MessageId,
    cancel: CancellationToken,
    pipeline: Arc<PipelineHandle>,
}

/// How a send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Completed { fragments: usize, chars: usize },
    /// The placeholder carries the error; `kind` is `None` if the send task died.
    Failed { kind: Option<ErrorKind>, error: String },
    Cancelled,
}

impl From<StreamOutcome> for SendOutcome {
    fn from(outcome: StreamOutcome) -> Self {
        match outcome {
            StreamOutcome::Completed { fragments, chars } => Self::Completed { fragments, chars },
            StreamOutcome::Failed { kind, error } => Self::Failed {
                kind: Some(kind),
                error,
            },
            StreamOutcome::Cancelled => Self::Cancelled,
        }
    }
}

/// Returned by [`ChatController::send`] once the placeholder is in place.
pub struct SendHandle {
    pub session_id: SessionId,
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
    thinking: watch::Receiver<PipelineRun>,
    task: JoinHandle<SendOutcome>,
}

impl SendHandle {
    /// Observe the thinking pipeline of this send.
    pub fn thinking(&self) -> watch::Receiver<PipelineRun> {
        self.thinking.clone()
    }

    /// Wait for the reply to finish.
    pub async fn wait(self) -> SendOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "Send task failed");
                SendOutcome::Failed {
                    kind: None,
                    error: e.to_string(),
                }
            }
        }
    }
}

pub struct ChatController {
    store: Arc<SessionStore>,
    provider: Arc<dyn LLMProvider>,
    aggregator: StreamingAggregator,
    pipeline: ThinkingPipeline,
    config: EngineConfig,
    in_flight: Arc<DashMap<SessionId, InFlight>>,
}

impl ChatController {
    pub fn new(store: Arc<SessionStore>, provider: Arc<dyn LLMProvider>, config: EngineConfig) -> Self {
        let pipeline = ThinkingPipeline::interval(config.thinking_interval);
        Self {
            aggregator: StreamingAggregator::new(store.clone()),
            store,
            provider,
            pipeline,
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Replace how thinking pipelines are paced.
    pub fn with_pipeline(mut self, pipeline: ThinkingPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn aggregator(&self) -> &StreamingAggregator {
        &self.aggregator
    }

    /// Send a user message and start streaming the reply.
    ///
    /// Returns after the user message and placeholder are appended and the
    /// thinking pipeline is running. Must be called inside a tokio runtime.
    pub fn send(&self, session_id: SessionId, content: &str, model: &str) -> Result<SendHandle> {
        let content = validate_content(content)?;
        let user = ChatMessage::user(content);
        let placeholder = ChatMessage::assistant_placeholder();
        let user_message_id = user.id;
        let assistant_message_id = placeholder.id;

        let cancel = CancellationToken::new();
        let (pipeline, session) = match self.in_flight.entry(session_id) {
            Entry::Occupied(_) => {
                tracing::debug!(session_id = %session_id, "Send rejected, reply in progress");
                return Err(ChatError::Concurrency(session_id));
            }
            Entry::Vacant(slot) => {
                self.store
                    .append_messages(session_id, vec![user, placeholder])
                    .map_err(ChatError::from_store)?;
                let session = self
                    .store
                    .get(session_id)
                    .ok_or(ChatError::SessionNotFound(session_id))?;

                let pipeline = Arc::new(self.pipeline.launch());
                slot.insert(InFlight {
                    message_id: assistant_message_id,
                    cancel: cancel.clone(),
                    pipeline: pipeline.clone(),
                });
                (pipeline, session)
            }
        };

        let request = ChatRequest::new(model, build_prompt(&session, &self.config.system_prompt))
            .with_stream(self.config.stream);

        tracing::info!(
            session_id = %session_id,
            message_id = %assistant_message_id,
            model = %model,
            provider = self.provider.name(),
            "Send started"
        );

        let thinking = pipeline.subscribe();
        let task = tokio::spawn(run_send(SendJob {
            target: StreamTarget::new(session_id, assistant_message_id),
            request,
            store: self.store.clone(),
            provider: self.provider.clone(),
            aggregator: self.aggregator.clone(),
            in_flight: self.in_flight.clone(),
            pipeline,
            cancel,
        }));

        Ok(SendHandle {
            session_id,
            user_message_id,
            assistant_message_id,
            thinking,
            task,
        })
    }

    /// Create a session titled after `content` (unless `title` is given) and
    /// send `content` as its first message.
    pub fn start_chat(
        &self,
        content: &str,
        model: &str,
        title: Option<&str>,
    ) -> Result<(Arc<ChatSession>, SendHandle)> {
        let content = validate_content(content)?;

        let mut initial = NewSession::new(model).with_first_message(content);
        if let Some(title) = title {
            initial = initial.with_title(title);
        }
        if let Some(user_id) = &self.config.user_id {
            initial = initial.with_user(user_id);
        }

        let session = self.store.create_session(initial);
        let handle = self.send(session.id, content, model)?;
        Ok((session, handle))
    }

    /// Cancel the reply in progress, if any.
    ///
    /// When this returns, the placeholder is no longer streaming and the
    /// thinking pipeline has no active step.
    pub fn cancel(&self, session_id: SessionId) -> bool {
        let Some((_, flight)) = self.in_flight.remove(&session_id) else {
            return false;
        };

        flight.cancel.cancel();
        if let Err(e) = flight.pipeline.cancel() {
            tracing::trace!(session_id = %session_id, error = %e, "Pipeline already ended");
        }
        self.aggregator
            .cancel(StreamTarget::new(session_id, flight.message_id));

        tracing::info!(session_id = %session_id, message_id = %flight.message_id, "Send cancelled");
        true
    }

    /// Whether a reply is in progress for the session.
    pub fn is_busy(&self, session_id: SessionId) -> bool {
        self.in_flight.contains_key(&session_id) || self.store.streaming_message(session_id).is_some()
    }

    /// Thinking pipeline of the reply in progress.
    pub fn thinking(&self, session_id: SessionId) -> Option<watch::Receiver<PipelineRun>> {
        self.in_flight
            .get(&session_id)
            .map(|flight| flight.pipeline.subscribe())
    }

    pub fn rename_chat(&self, session_id: SessionId, title: &str) -> Result<Arc<ChatSession>> {
        self.store
            .rename_session(session_id, title)
            .map_err(ChatError::from_store)
    }

    /// Delete a session, cancelling its reply first.
    pub fn delete_chat(&self, session_id: SessionId) -> Result<Arc<ChatSession>> {
        self.cancel(session_id);
        self.store
            .delete_session(session_id)
            .ok_or(ChatError::SessionNotFound(session_id))
    }
}

fn validate_content(content: &str) -> Result<&str> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ChatError::Validation("message content is empty".to_string()));
    }
    Ok(trimmed)
}

/// History sent upstream: the system prompt, then every settled message.
///
/// Messages still streaming, failed replies and empty replies are left out.
fn build_prompt(session: &ChatSession, system_prompt: &str) -> Vec<PromptMessage> {
    let mut prompt = Vec::with_capacity(session.messages.len() + 1);
    if !system_prompt.trim().is_empty() {
        prompt.push(PromptMessage::system(system_prompt));
    }

    prompt.extend(
        session
            .messages
            .iter()
            .filter(|m| !m.is_streaming)
            .filter(|m| m.role == Role::User || (!m.is_error() && !m.content.is_empty()))
            .map(|m| PromptMessage {
                role: m.role.into(),
                content: m.content.clone(),
            }),
    );
    prompt
}

struct SendJob {
    target: StreamTarget,
    request: ChatRequest,
    store: Arc<SessionStore>,
    provider: Arc<dyn LLMProvider>,
    aggregator: StreamingAggregator,
    in_flight: Arc<DashMap<SessionId, InFlight>>,
    pipeline: Arc<PipelineHandle>,
    cancel: CancellationToken,
}

async fn request_reply(provider: &dyn LLMProvider, request: &ChatRequest) -> chat_llm::Result<LLMStream> {
    if request.stream {
        return provider.chat_stream(request).await;
    }

    // A whole reply is delivered as a single fragment.
    let completion = provider.chat(request).await?;
    let chunk: chat_llm::Result<LLMChunk> = Ok(LLMChunk::Token(completion.content));
    Ok(Box::pin(stream::iter(vec![chunk])))
}

async fn run_send(job: SendJob) -> SendOutcome {
    let SendJob {
        target,
        request,
        store,
        provider,
        aggregator,
        in_flight,
        pipeline,
        cancel,
    } = job;

    let source = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            end_pipeline(&pipeline, &StreamOutcome::Cancelled);
            return SendOutcome::Cancelled;
        }
        source = request_reply(provider.as_ref(), &request) => source,
    };

    let outcome = match source {
        Ok(source) => {
            let hook_pipeline = pipeline.clone();
            let hook: FinalizeHook = Box::new(move |outcome| end_pipeline(&hook_pipeline, outcome));

            match aggregator.attach_with(target, source, Some(hook)) {
                Ok(handle) => SendOutcome::from(handle.finished().await),
                // Cancelled or deleted between the request and the attach.
                Err(e) => {
                    tracing::debug!(session_id = %target.session_id, error = %e, "Reply target gone");
                    end_pipeline(&pipeline, &StreamOutcome::Cancelled);
                    SendOutcome::Cancelled
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                session_id = %target.session_id,
                message_id = %target.message_id,
                kind = ?e.kind(),
                error = %e,
                "Reply request failed"
            );
            let error = e.to_string();
            let outcome = SendOutcome::Failed {
                kind: Some(e.kind()),
                error: error.clone(),
            };
            end_pipeline(&pipeline, &StreamOutcome::Cancelled);
            if !cancel.is_cancelled() {
                store.update_message(target.session_id, target.message_id, &MessagePatch::fail(error));
            }
            outcome
        }
    };

    in_flight.remove_if(&target.session_id, |_, flight| flight.message_id == target.message_id);

    tracing::info!(
        session_id = %target.session_id,
        message_id = %target.message_id,
        outcome = ?outcome,
        "Send finished"
    );
    outcome
}

fn end_pipeline(pipeline: &PipelineHandle, outcome: &StreamOutcome) {
    let result = match outcome {
        StreamOutcome::Completed { .. } => pipeline.finish(),
        _ => pipeline.cancel(),
    };
    if let Err(e) = result {
        tracing::trace!(error = %e, "Pipeline already ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_content_trims() {
        assert_eq!(validate_content("  hi \n").unwrap(), "hi");
        assert!(matches!(validate_content(" \n\t"), Err(ChatError::Validation(_))));
    }

    #[test]
    fn prompt_skips_placeholder_and_failed_replies() {
        let mut session = NewSession::new("m").build();
        session.messages.push(ChatMessage::user("first"));
        let failed = ChatMessage::assistant_placeholder()
            .apply(&MessagePatch::append("half"))
            .apply(&MessagePatch::fail("boom"));
        session.messages.push(failed);
        session.messages.push(ChatMessage::user("second"));
        session.messages.push(ChatMessage::assistant("answer"));
        session.messages.push(ChatMessage::user("third"));
        session.messages.push(ChatMessage::assistant_placeholder());

        let prompt = build_prompt(&session, "be nice");
        let contents: Vec<_> = prompt.iter().map(|m| m.content.as_str()).collect();

        assert_eq!(contents, vec!["be nice", "first", "second", "answer", "third"]);
        assert_eq!(prompt[0], PromptMessage::system("be nice"));
        assert_eq!(prompt[3], PromptMessage::assistant("answer"));
    }

    #[test]
    fn prompt_without_system_prompt() {
        let mut session = NewSession::new("m").build();
        session.messages.push(ChatMessage::user("hello"));

        let prompt = build_prompt(&session, "  ");
        assert_eq!(prompt, vec![PromptMessage::user("hello")]);
    }
}
