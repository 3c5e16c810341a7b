//! Application configuration

pub mod client;
pub mod prompts;

use std::env;

use serde::{Deserialize, Serialize};

pub use client::{ClientConfig, ConfigError, EndpointMode};
pub use prompts::builtin as prompts_builtin;

pub const DEFAULT_ENGINE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "deepseek-r1:14b";

/// Relay server configuration, read from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub ollama_url: String,
    pub default_model: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            ollama_url: env::var("OLLAMA_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_ENGINE_URL.into()),
            default_model: env::var("DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            ollama_url: DEFAULT_ENGINE_URL.into(),
            default_model: DEFAULT_MODEL.into(),
        }
    }
}
