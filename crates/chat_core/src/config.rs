use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::paths::{config_json_path, load_config_json};

pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. When providing responses, use markdown formatting to make your answers clear and well-structured. Use headings, lists, code blocks, tables, and other markdown elements when appropriate to organize information effectively.";
pub const DEFAULT_THINKING_INTERVAL_MS: u64 = 1000;

const CONFIG_FILE_PATH: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Request a chunked reply instead of a single response body.
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Delay between thinking pipeline stages.
    #[serde(default = "default_thinking_interval_ms")]
    pub thinking_interval_ms: u64,
    /// Sent as `HTTP-Referer`.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    /// Sent as `X-Title`.
    #[serde(default = "default_app_title")]
    pub app_title: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_thinking_interval_ms() -> u64 {
    DEFAULT_THINKING_INTERVAL_MS
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_app_title() -> String {
    "AI Agent Chat".to_string()
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            stream: true,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            thinking_interval_ms: default_thinking_interval_ms(),
            app_url: default_app_url(),
            app_title: default_app_title(),
            user_id: None,
        }
    }
}

impl Config {
    /// Load from `~/.chat-engine/config.json`, falling back to `./config.toml`,
    /// then apply environment overrides.
    pub fn new() -> Self {
        let mut config = Self::from_files(&config_json_path(), Path::new(CONFIG_FILE_PATH));
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn from_files(json_path: &Path, toml_path: &Path) -> Self {
        if json_path.exists() {
            match load_config_json::<Config>(json_path) {
                Ok(config) => return config,
                Err(e) => log::warn!("Ignoring {}: {}", json_path.display(), e),
            }
        }

        if toml_path.exists() {
            match std::fs::read_to_string(toml_path) {
                Ok(content) => match toml::from_str::<Config>(&content) {
                    Ok(config) => return config,
                    Err(e) => log::warn!("Ignoring {}: {}", toml_path.display(), e),
                },
                Err(e) => log::warn!("Failed to read {}: {}", toml_path.display(), e),
            }
        }

        Self::default()
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_key) = lookup("OPENROUTER_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(api_key);
        }
        if let Some(api_base) = lookup("OPENROUTER_API_BASE") {
            self.api_base = api_base;
        }
        if let Some(model) = lookup("CHAT_MODEL") {
            self.model = model;
        }
        if let Some(stream) = lookup("CHAT_STREAM") {
            self.stream = parse_bool_env(&stream);
        }
        if let Some(interval) = lookup("CHAT_THINKING_INTERVAL_MS") {
            match interval.trim().parse::<u64>() {
                Ok(ms) => self.thinking_interval_ms = ms,
                Err(_) => log::warn!("CHAT_THINKING_INTERVAL_MS is not a number: {interval:?}"),
            }
        }
        if let Some(prompt) = lookup("CHAT_SYSTEM_PROMPT") {
            self.system_prompt = prompt;
        }
        if let Some(url) = lookup("APP_URL") {
            self.app_url = url;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_bool_env_true_values() {
        for value in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert!(parse_bool_env(value), "value {value:?} should be true");
        }
    }

    #[test]
    fn parse_bool_env_false_values() {
        for value in ["0", "false", "no", "off", "", "  "] {
            assert!(!parse_bool_env(value), "value {value:?} should be false");
        }
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENROUTER_API_KEY", "sk-or-test"),
            ("CHAT_MODEL", "anthropic/claude-3.5-sonnet"),
            ("CHAT_STREAM", "off"),
            ("CHAT_THINKING_INTERVAL_MS", "250"),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("sk-or-test"));
        assert_eq!(config.model, "anthropic/claude-3.5-sonnet");
        assert!(!config.stream);
        assert_eq!(config.thinking_interval_ms, 250);
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let mut config = Config::default();
        config.apply_env(|key| (key == "OPENROUTER_API_KEY").then(|| "  ".to_string()));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn toml_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("config.toml");
        std::fs::write(&toml_path, "model = \"mistral/mistral-large\"\nstream = false\n").unwrap();

        let config = Config::from_files(&dir.path().join("missing.json"), &toml_path);
        assert_eq!(config.model, "mistral/mistral-large");
        assert!(!config.stream);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.max_tokens, 2000);
    }

    #[test]
    fn json_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("config.json");
        let toml_path = dir.path().join("config.toml");
        std::fs::write(&json_path, r#"{"model": "from-json"}"#).unwrap();
        std::fs::write(&toml_path, "model = \"from-toml\"\n").unwrap();

        let config = Config::from_files(&json_path, &toml_path);
        assert_eq!(config.model, "from-json");
    }
}
