//! Opsmedic Configuration
//!
//! Loads and saves the operator configuration from `~/.opsmedic/config.json`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_ITERATION_LIMIT;

/// Config file name within the opsmedic directory.
const CONFIG_FILENAME: &str = "config.json";

const DEFAULT_API_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OpsmedicConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub iteration_limit: usize,
    pub aws_profile: String,
    pub aws_region: String,
}

pub fn default_config() -> OpsmedicConfig {
    OpsmedicConfig {
        api_url: DEFAULT_API_URL.to_string(),
        api_key: String::new(),
        model: DEFAULT_MODEL.to_string(),
        max_tokens: DEFAULT_MAX_TOKENS,
        iteration_limit: DEFAULT_ITERATION_LIMIT,
        aws_profile: String::new(),
        aws_region: String::new(),
    }
}

/// Returns the opsmedic directory: `~/.opsmedic`.
pub fn get_opsmedic_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".opsmedic")
}

/// Returns the full path to the config file: `~/.opsmedic/config.json`.
pub fn get_config_path() -> PathBuf {
    get_opsmedic_dir().join(CONFIG_FILENAME)
}

/// Load the config from disk, merging missing fields with defaults and
/// falling back to the `ANTHROPIC_API_KEY` environment variable when the
/// file does not carry a key. Returns defaults when no file exists.
pub fn load_config() -> OpsmedicConfig {
    let mut config = read_config_file(&get_config_path()).unwrap_or_default();
    let defaults = default_config();

    if config.api_url.is_empty() {
        config.api_url = defaults.api_url;
    }
    if config.model.is_empty() {
        config.model = defaults.model;
    }
    if config.max_tokens == 0 {
        config.max_tokens = defaults.max_tokens;
    }
    if config.iteration_limit == 0 {
        config.iteration_limit = defaults.iteration_limit;
    }
    if config.api_key.is_empty() {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            config.api_key = key;
        }
    }

    config
}

fn read_config_file(path: &PathBuf) -> Option<OpsmedicConfig> {
    if !path.exists() {
        return None;
    }
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Save the config to `~/.opsmedic/config.json`.
///
/// Creates the opsmedic directory with mode 0o700 if it does not exist.
/// The config file is written with mode 0o600 since it carries the API key.
pub fn save_config(config: &OpsmedicConfig) -> Result<()> {
    let dir = get_opsmedic_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create opsmedic directory")?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }

    let config_path = get_config_path();
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&config_path, &json).context("Failed to write config file")?;
    fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: OpsmedicConfig = serde_json::from_str(r#"{"api_key":"sk-test"}"#).unwrap();
        assert_eq!(config.api_key, "sk-test");
        assert!(config.model.is_empty());

        let defaults = default_config();
        assert_eq!(defaults.api_url, DEFAULT_API_URL);
        assert_eq!(defaults.iteration_limit, DEFAULT_ITERATION_LIMIT);
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = default_config();
        config.api_key = "sk-test".to_string();
        config.aws_region = "eu-west-1".to_string();

        let json = serde_json::to_string(&config).unwrap();
        let parsed: OpsmedicConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.api_key, "sk-test");
        assert_eq!(parsed.aws_region, "eu-west-1");
        assert_eq!(parsed.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_resolve_path_with_tilde() {
        let resolved = resolve_path("~/some/path");
        assert!(!resolved.starts_with('~'));
        assert!(resolved.ends_with("some/path"));
    }

    #[test]
    fn test_resolve_path_without_tilde() {
        let path = "/absolute/path/to/file";
        assert_eq!(resolve_path(path), path);
    }
}
