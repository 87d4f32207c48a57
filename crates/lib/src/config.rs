//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.switchyard/config.json`) and environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Bot-wide settings (title, cancel command, user data file).
    #[serde(default)]
    pub bot: BotConfig,

    /// Reference adapter settings.
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Display name used in greetings (default "Bot").
    #[serde(default = "default_title")]
    pub title: String,

    /// Typing this inside a conversation ends it (default "/cancel"). `null` disables.
    #[serde(default = "default_cancel_command")]
    pub cancel_command: Option<String>,

    /// JSON file for long-lived user data. Overridden by SWITCHYARD_USER_FILE. When neither is set,
    /// user data is kept in memory only.
    #[serde(default)]
    pub user_file: Option<PathBuf>,
}

fn default_title() -> String {
    "Bot".to_string()
}

fn default_cancel_command() -> Option<String> {
    Some("/cancel".to_string())
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            cancel_command: default_cancel_command(),
            user_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub webchat: WebchatConfig,

    #[serde(default)]
    pub console: ConsoleConfig,
}

/// Webchat HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebchatConfig {
    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_webchat_bind")]
    pub bind: String,

    /// Port (default 8080).
    #[serde(default = "default_webchat_port")]
    pub port: u16,

    /// Path the chat widget POSTs to (default "/chat").
    #[serde(default = "default_webchat_route")]
    pub route: String,
}

fn default_webchat_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_webchat_port() -> u16 {
    8080
}

fn default_webchat_route() -> String {
    "/chat".to_string()
}

impl Default for WebchatConfig {
    fn default() -> Self {
        Self {
            bind: default_webchat_bind(),
            port: default_webchat_port(),
            route: default_webchat_route(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    /// Raw user id for the local console user (default "local").
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default = "default_console_prompt")]
    pub prompt: String,
}

fn default_console_prompt() -> String {
    "> ".to_string()
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            user: None,
            prompt: default_console_prompt(),
        }
    }
}

impl ConsoleConfig {
    pub fn user_or_default(&self) -> &str {
        self.user
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("local")
    }
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve the user data file: env SWITCHYARD_USER_FILE overrides config.
pub fn resolve_user_file(config: &Config) -> Option<PathBuf> {
    std::env::var("SWITCHYARD_USER_FILE")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(PathBuf::from(t))
            }
        })
        .or_else(|| {
            config
                .bot
                .user_file
                .clone()
                .filter(|p| !p.as_os_str().is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SWITCHYARD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".switchyard").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, else the default path (or SWITCHYARD_CONFIG_PATH). Missing
/// file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
