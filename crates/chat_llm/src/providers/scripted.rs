//! Provider that replays canned replies, for tests and offline runs.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::provider::{LLMError, LLMProvider, LLMStream, Result};
use crate::types::{ChatRequest, LLMChunk};

/// One scripted reply. Each call to the provider consumes the next reply.
#[derive(Debug)]
pub enum ScriptedReply {
    /// Stream these fragments, then close.
    Fragments(Vec<String>),
    /// Stream these fragments, then fail with a stream error.
    FailAfter {
        fragments: Vec<String>,
        message: String,
    },
    /// Reject the request before any fragment.
    Reject { status: u16, message: String },
    /// Forward whatever the test sends; the stream closes when the sender drops.
    Channel(mpsc::UnboundedReceiver<Result<LLMChunk>>),
}

#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: ScriptedReply) -> &Self {
        lock(&self.replies).push_back(reply);
        self
    }

    pub fn with_reply<I, S>(self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(ScriptedReply::Fragments(
            fragments.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn with_failure_after<I, S>(self, fragments: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(ScriptedReply::FailAfter {
            fragments: fragments.into_iter().map(Into::into).collect(),
            message: message.into(),
        });
        self
    }

    pub fn with_rejection(self, status: u16, message: impl Into<String>) -> Self {
        self.push(ScriptedReply::Reject {
            status,
            message: message.into(),
        });
        self
    }

    /// Queue a reply fed by hand; returns the feeding end.
    pub fn channel(&self) -> mpsc::UnboundedSender<Result<LLMChunk>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(ScriptedReply::Channel(rx));
        tx
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

fn tokens(fragments: Vec<String>) -> impl Iterator<Item = Result<LLMChunk>> {
    fragments.into_iter().map(|f| Ok(LLMChunk::Token(f)))
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<LLMStream> {
        lock(&self.requests).push(request.clone());
        let reply = lock(&self.replies).pop_front();

        match reply {
            Some(ScriptedReply::Fragments(fragments)) => Ok(Box::pin(stream::iter(tokens(fragments)))),
            Some(ScriptedReply::FailAfter { fragments, message }) => {
                let items = tokens(fragments).chain(std::iter::once(Err(LLMError::Stream(message))));
                Ok(Box::pin(stream::iter(items)))
            }
            Some(ScriptedReply::Reject { status, message }) => Err(LLMError::Api { status, message }),
            Some(ScriptedReply::Channel(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            None => Err(LLMError::Api {
                status: 500,
                message: "no scripted reply left".to_string(),
            }),
        }
    }
}
