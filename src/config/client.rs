//! Chat client configuration loaded from TOML files
//!
//! The client talks either straight to the engine or through the relay.
//! Which one is an explicit setting:
//!
//! ```toml
//! [endpoint]
//! mode = "relay"
//! relay_url = "http://localhost:3000"
//!
//! [model]
//! name = "llama3.2"
//!
//! [storage]
//! path = "./data/chats.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{prompts_builtin, DEFAULT_ENGINE_URL, DEFAULT_MODEL};

/// Root client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Where requests go
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Model used for local generation
    #[serde(default)]
    pub model: ModelConfig,

    /// Conversation naming
    #[serde(default)]
    pub naming: NamingConfig,

    /// Chat history storage
    #[serde(default)]
    pub storage: StorageConfig,
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The URL for the selected mode must be set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (name, url) = match self.endpoint.mode {
            EndpointMode::Local => ("engine_url", &self.endpoint.engine_url),
            EndpointMode::Relay => ("relay_url", &self.endpoint.relay_url),
        };

        if url.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "endpoint.{} is required in {:?} mode",
                name, self.endpoint.mode
            )));
        }

        if self.endpoint.mode == EndpointMode::Local && self.model.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "model.name is required in local mode".to_string(),
            ));
        }

        Ok(())
    }
}

/// Deployment topology, chosen once at construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointMode {
    /// Direct to the engine's native generate endpoint
    #[default]
    Local,
    /// Through the relay server
    Relay,
}

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub mode: EndpointMode,

    #[serde(default = "default_engine_url")]
    pub engine_url: String,

    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Request timeout in seconds (generation can be slow)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_engine_url() -> String {
    DEFAULT_ENGINE_URL.to_string()
}

fn default_relay_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout() -> u64 {
    300
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            mode: EndpointMode::default(),
            engine_url: default_engine_url(),
            relay_url: default_relay_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub name: String,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
        }
    }
}

/// Conversation naming after the first turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prompt prefix; the first user message is appended
    #[serde(default = "default_naming_prompt")]
    pub prompt: String,
}

fn default_true() -> bool {
    true
}

fn default_naming_prompt() -> String {
    prompts_builtin::CHAT_NAME.to_string()
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prompt: default_naming_prompt(),
        }
    }
}

/// Chat history storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file. Chats are kept in memory when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
