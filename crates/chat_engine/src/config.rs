use std::time::Duration;

use chat_core::config::{DEFAULT_SYSTEM_PROMPT, DEFAULT_THINKING_INTERVAL_MS};
use chat_core::Config;

/// Settings the controller needs from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub system_prompt: String,
    /// Ask the provider for a chunked reply.
    pub stream: bool,
    pub thinking_interval: Duration,
    pub user_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            stream: true,
            thinking_interval: Duration::from_millis(DEFAULT_THINKING_INTERVAL_MS),
            user_id: None,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            stream: config.stream,
            thinking_interval: Duration::from_millis(config.thinking_interval_ms),
            user_id: config.user_id.clone(),
        }
    }
}
