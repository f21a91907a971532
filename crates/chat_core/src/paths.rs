use std::path::{Path, PathBuf};

/// Application data directory (~/.chat-engine)
pub fn app_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".chat-engine")
}

/// Path of config.json
pub fn config_json_path() -> PathBuf {
    app_dir().join("config.json")
}

/// Directory holding persisted sessions
pub fn sessions_dir() -> PathBuf {
    app_dir().join("sessions")
}

/// Load a JSON config file
pub fn load_config_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    if !path.exists() {
        return Err(format!("Config file not found: {}", path.display()));
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read config: {e}"))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {e}"))
}
