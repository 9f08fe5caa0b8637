use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::chatbot::completion::DEFAULT_BASE_URL;

pub const DEFAULT_CONFIG_PATH: &str = "chatrelay.json";
pub const DEFAULT_MODEL: &str = "google/gemini-2.5-pro";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// An environment override could not be parsed.
    InvalidValue { key: String, value: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value for {}: '{}'", key, value)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidValue { .. } | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    openrouter_api_key: String,
    text_model: Option<String>,
    vision_model: Option<String>,
    /// Directory for the database and logs. Defaults to ./data.
    data_dir: Option<String>,
    /// Chat that receives forwarded log lines.
    log_chat_id: Option<i64>,
    openrouter_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub openrouter_api_key: String,
    pub text_model: String,
    pub vision_model: String,
    /// Directory for the database and logs.
    pub data_dir: PathBuf,
    pub log_chat_id: Option<i64>,
    pub openrouter_base_url: String,
}

impl Config {
    /// Load `path` (if it exists) and apply overrides from the process environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Like `load`, with environment lookups going through `env`.
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let file = match std::fs::read_to_string(&config_path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigFile::default(),
            Err(e) => return Err(ConfigError::ReadFile { path: config_path, source: e }),
        };

        // Empty variables count as unset
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let telegram_bot_token = env("BOT_TOKEN").unwrap_or(file.telegram_bot_token);
        let openrouter_api_key = env("OPENROUTER_KEY").unwrap_or(file.openrouter_api_key);
        let text_model = env("TEXT_MODEL")
            .or(file.text_model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let vision_model = env("VISION_MODEL")
            .or(file.vision_model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let data_dir = env("DATA_DIR")
            .or(file.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));
        let log_chat_id = match env("LOG_CHAT_ID") {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ConfigError::InvalidValue { key: "LOG_CHAT_ID".into(), value })?,
            ),
            None => file.log_chat_id,
        };
        let openrouter_base_url = file
            .openrouter_base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        // Validate required fields
        if telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation(
                "telegram bot token is required (BOT_TOKEN or telegram_bot_token)".into(),
            ));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2
            || token_parts[0].parse::<u64>().is_err()
            || token_parts[1].is_empty()
        {
            return Err(ConfigError::Validation(
                "telegram bot token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if openrouter_api_key.is_empty() {
            return Err(ConfigError::Validation(
                "OpenRouter API key is required (OPENROUTER_KEY or openrouter_api_key)".into(),
            ));
        }

        Ok(Self {
            telegram_bot_token,
            openrouter_api_key,
            text_model,
            vision_model,
            data_dir,
            log_chat_id,
            openrouter_base_url,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("bot.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
