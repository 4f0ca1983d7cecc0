use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    pub database: String,
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

impl StoreConfig {
    /// The connection string, with `MONGODB_URI` taking precedence over the file.
    pub fn resolved_uri(&self) -> String {
        std::env::var("MONGODB_URI").unwrap_or_else(|_| self.uri.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            url: None,
            timeout_secs: default_timeout_secs(),
            temperature: 0.0,
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.store.database.trim().is_empty() {
        anyhow::bail!("store.database must not be empty");
    }

    match config.generator.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generator provider: '{}'. Must be openai or ollama.",
            other
        ),
    }

    if config.generator.model.trim().is_empty() {
        anyhow::bail!("generator.model must not be empty");
    }

    if config.generator.timeout_secs == 0 {
        anyhow::bail!("generator.timeout_secs must be > 0");
    }

    Ok(())
}
