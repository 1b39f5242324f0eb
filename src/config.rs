use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::session::EchoMode;

/// Environment variable that overrides the token stored in settings
pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Which completion backend answers AI requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionBackend {
    #[default]
    ClaudeCli,
    Http,
}

/// Completion service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSettings {
    #[serde(default)]
    pub backend: CompletionBackend,
    /// Base URL of an OpenAI-compatible API (http backend only)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Name of the env var holding the API key, never the key itself
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            backend: CompletionBackend::default(),
            endpoint: default_endpoint(),
            model: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// How stale prompts are tidied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StaleMessages {
    #[default]
    Strip,
    Delete,
}

impl From<StaleMessages> for EchoMode {
    fn from(s: StaleMessages) -> Self {
        match s {
            StaleMessages::Strip => EchoMode::Strip,
            StaleMessages::Delete => EchoMode::Delete,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_token: Option<String>,
    /// "Still working" interval while an AI call is outstanding
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Cancel AI calls automatically after this long
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_deadline_secs: Option<u64>,
    /// Reply with a hint when input matches nothing in the current step
    #[serde(default)]
    pub reply_on_unmatched: bool,
    #[serde(default)]
    pub stale_messages: StaleMessages,
    #[serde(default)]
    pub completion: CompletionSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_heartbeat_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_token: None,
            heartbeat_secs: default_heartbeat_secs(),
            task_deadline_secs: None,
            reply_on_unmatched: false,
            stale_messages: StaleMessages::default(),
            completion: CompletionSettings::default(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Settings {
    /// Returns the config directory path (~/.clubbot)
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".clubbot"))
    }

    /// Returns the config file path (~/.clubbot/settings.json)
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("settings.json"))
    }

    /// Load settings from `path`, or from the default location.
    /// A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path().ok_or(ConfigError::NoConfigDir)?,
        };

        if !path.exists() {
            let settings = Self::default();
            settings.save_to(&path)?;
            return Ok(settings);
        }

        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Saves settings using atomic write pattern
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
                // Set directory permissions to user-only on Unix
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = fs::Permissions::from_mode(0o700);
                    let _ = fs::set_permissions(dir, perms);
                }
            }
        }

        let temp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self)?;

        // Atomic write: write to temp file first, then rename
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Token precedence: command line, then environment, then settings file
    pub fn resolve_token(&self, cli: Option<&str>) -> Result<String, ConfigError> {
        let env = std::env::var(TOKEN_ENV).ok();
        pick_token(cli, env.as_deref(), self.telegram_token.as_deref()).ok_or(ConfigError::MissingToken)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn task_deadline(&self) -> Option<Duration> {
        self.task_deadline_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

fn pick_token(cli: Option<&str>, env: Option<&str>, file: Option<&str>) -> Option<String> {
    [cli, env, file]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
}
