//! OpenAI-compatible request serialization and response parsing.
//!
//! OpenRouter accepts the OpenAI chat completions shape: a `messages` array of
//! `{role, content}` pairs, `data:` SSE events carrying `choices[0].delta`,
//! and a `[DONE]` sentinel.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::provider::{LLMError, Result};
use crate::types::{ChatCompletion, ChatRequest, LLMChunk, Usage};

/// Sampling options added to every request body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

/// Build an OpenAI-compatible chat request body.
pub fn build_openai_compat_body(request: &ChatRequest, options: SamplingOptions) -> Value {
    json!({
        "model": request.model,
        "messages": request.messages,
        "stream": request.stream,
        "temperature": options.temperature,
        "max_tokens": options.max_tokens,
    })
}

// --- Streaming chunk parsing ---

#[derive(Debug, Deserialize)]
struct OpenAICompatStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAICompatStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatStreamChoice {
    #[serde(default)]
    delta: OpenAICompatDelta,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAICompatDelta {
    content: Option<String>,
}

/// Parse an SSE `data:` payload.
///
/// - `"[DONE]"` -> `LLMChunk::Done`
/// - a chunk without text content -> `LLMChunk::Token("")`
/// - invalid JSON -> error
pub fn parse_openai_compat_sse_data(data: &str) -> Result<LLMChunk> {
    if data.trim() == "[DONE]" {
        return Ok(LLMChunk::Done);
    }

    let chunk: OpenAICompatStreamChunk = serde_json::from_str(data)?;
    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .unwrap_or_default();
    Ok(LLMChunk::Token(content))
}

// --- Non-streaming response parsing ---

#[derive(Debug, Deserialize)]
struct OpenAICompatResponse {
    #[serde(default)]
    choices: Vec<OpenAICompatChoice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatChoice {
    message: Option<OpenAICompatMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Parse a complete chat completion body into `{content, model, usage}`.
///
/// `fallback_model` is used when the body does not name the model.
pub fn parse_openai_compat_response(body: &str, fallback_model: &str) -> Result<ChatCompletion> {
    if body.trim().is_empty() {
        return Err(LLMError::Parse("empty response body".to_string()));
    }

    let response: OpenAICompatResponse = serde_json::from_str(body)?;
    let message = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .ok_or_else(|| LLMError::Parse("response has no choices[0].message".to_string()))?;

    Ok(ChatCompletion {
        content: message.content.unwrap_or_default(),
        model: response.model.unwrap_or_else(|| fallback_model.to_string()),
        usage: response.usage,
    })
}

/// Pull a readable message out of an error body.
///
/// Handles `{"error": {"message": ..}}`, `{"error": ".."}` and plain text.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        match &value["error"] {
            Value::String(message) => return message.clone(),
            Value::Object(error) => {
                if let Some(message) = error.get("message").and_then(Value::as_str) {
                    return message.to_string();
                }
            }
            _ => {}
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no error details".to_string()
    } else {
        trimmed.to_string()
    }
}
