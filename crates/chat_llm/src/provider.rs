use crate::types::{ChatCompletion, ChatRequest, LLMChunk};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// Coarse classification used by callers to decide how to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure or an interrupted stream.
    Network,
    /// The service answered with a non-success status.
    Upstream,
    /// The body was empty or malformed.
    Parse,
    /// Missing or rejected credentials. Not worth retrying.
    Configuration,
}

impl LLMError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(e) if e.is_decode() => ErrorKind::Parse,
            Self::Http(_) | Self::Stream(_) => ErrorKind::Network,
            Self::Json(_) | Self::Parse(_) => ErrorKind::Parse,
            Self::Api { .. } => ErrorKind::Upstream,
            Self::Auth(_) | Self::MissingCredentials(_) => ErrorKind::Configuration,
        }
    }

    /// HTTP status of an upstream rejection, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LLMError>;

pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMChunk>> + Send>>;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Stream a reply as ordered text fragments.
    ///
    /// Errors returned here happen before the first fragment; errors inside
    /// the stream happen after zero or more fragments.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<LLMStream>;

    /// Fetch a complete reply.
    ///
    /// The default collects [`chat_stream`](Self::chat_stream).
    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let mut stream = self.chat_stream(request).await?;
        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                LLMChunk::Token(text) => content.push_str(&text),
                LLMChunk::Done => break,
            }
        }

        Ok(ChatCompletion {
            content,
            model: request.model.clone(),
            usage: None,
        })
    }
}
