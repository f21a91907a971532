use async_trait::async_trait;
use chat_core::Config;
use reqwest::{Client, Response, StatusCode};

use crate::provider::{LLMError, LLMProvider, LLMStream, Result};
use crate::types::{ChatCompletion, ChatRequest};

use super::common::openai_compat::{
    build_openai_compat_body, extract_error_message, parse_openai_compat_response,
    parse_openai_compat_sse_data, SamplingOptions,
};
use super::common::sse::llm_stream_from_sse;

/// OpenRouter chat completions client.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    app_url: String,
    app_title: String,
    sampling: SamplingOptions,
}

impl OpenRouterProvider {
    /// Fails with [`LLMError::MissingCredentials`] when no usable key is given.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LLMError::MissingCredentials("OPENROUTER_API_KEY is not set".to_string()))?;

        let defaults = Config::default();
        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: defaults.api_base,
            app_url: defaults.app_url,
            app_title: defaults.app_title,
            sampling: SamplingOptions::default(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.api_key.clone())?
            .with_base_url(&config.api_base)
            .with_app(&config.app_url, &config.app_title)
            .with_sampling(config.temperature, config.max_tokens))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Attribution headers (`HTTP-Referer`, `X-Title`).
    pub fn with_app(mut self, url: impl Into<String>, title: impl Into<String>) -> Self {
        self.app_url = url.into();
        self.app_title = title.into();
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.sampling = SamplingOptions {
            temperature,
            max_tokens,
        };
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post(&self, request: &ChatRequest, stream: bool) -> Result<Response> {
        let request = ChatRequest {
            stream,
            ..request.clone()
        };
        let body = build_openai_compat_body(&request, self.sampling);

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream,
            "Sending OpenRouter request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.app_url)
            .header("X-Title", &self.app_title)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = extract_error_message(&text);
        tracing::warn!(status = %status, error = %message, "OpenRouter request rejected");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LLMError::Auth(message)),
            _ => Err(LLMError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

#[async_trait]
impl LLMProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<LLMStream> {
        let response = self.post(request, true).await?;

        Ok(llm_stream_from_sse(response, |data| {
            if data.trim().is_empty() {
                return Ok(None);
            }
            parse_openai_compat_sse_data(data).map(Some)
        }))
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let response = self.post(request, false).await?;
        let body = response.text().await?;
        parse_openai_compat_response(&body, &request.model)
    }
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("base_url", &self.base_url)
            .field("app_url", &self.app_url)
            .field("app_title", &self.app_title)
            .field("sampling", &self.sampling)
            .finish_non_exhaustive()
    }
}
