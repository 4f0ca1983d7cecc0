//! Text generator abstraction and implementations.
//!
//! Defines the [`TextGenerator`] trait and concrete backends:
//! - **[`OpenAiGenerator`]**: OpenAI chat completions (`POST /v1/chat/completions`).
//! - **[`OllamaGenerator`]**: a local Ollama instance (`POST /api/chat`).
//! - **[`StaticGenerator`]**: replies with fixed text; used by tests and `exec`.
//!
//! Generators are called once per request. There is no retry or streaming:
//! a failed call is reported to the caller as-is.
//!
//! # Provider Selection
//!
//! Use [`create_generator`] to build the backend named in the configuration:
//!
//! ```rust,no_run
//! # use nl2mongo::config::GeneratorConfig;
//! # use nl2mongo::generator::create_generator;
//! let config = GeneratorConfig::default(); // provider = "openai"
//! let generator = create_generator(&config).unwrap(); // needs OPENAI_API_KEY
//! assert_eq!(generator.model_name(), "gpt-4o-mini");
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::GeneratorConfig;

/// An opaque text-to-text function: instructions plus a user query in,
/// generated text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    async fn generate(&self, instructions: &str, query: &str) -> Result<String>;
}

/// Build the generator named by `config.provider`.
///
/// # Errors
///
/// Returns an error for an unknown provider, or when the OpenAI provider is
/// selected and `OPENAI_API_KEY` is not set.
pub fn create_generator(config: &GeneratorConfig) -> Result<Box<dyn TextGenerator>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generator provider: {}", other),
    }
}

fn http_client(config: &GeneratorConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .with_context(|| "Failed to build HTTP client")
}

// ============ OpenAI ============

/// Generator backed by the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable. `url` in the config
/// overrides the API base (useful for OpenAI-compatible gateways).
pub struct OpenAiGenerator {
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: config.model.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            temperature: config.temperature,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, instructions: &str, query: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": instructions },
                { "role": "user", "content": query },
            ],
        });

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: Value = response.json().await?;
        parse_openai_response(&json)
    }
}

/// Extract `choices[0].message.content` from a chat completion.
fn parse_openai_response(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

// ============ Ollama ============

/// Generator backed by a local Ollama instance.
///
/// Calls `POST /api/chat` on the configured URL (default
/// `http://localhost:11434`) with streaming disabled.
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, instructions: &str, query: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "stream": false,
            "options": { "temperature": self.temperature },
            "messages": [
                { "role": "system", "content": instructions },
                { "role": "user", "content": query },
            ],
        });

        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {} failed (is Ollama running?)", url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: Value = response.json().await?;
        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
    }
}

// ============ Static ============

/// Generator that ignores its input and returns a fixed reply, or a fixed
/// failure.
pub struct StaticGenerator {
    reply: std::result::Result<String, String>,
}

impl StaticGenerator {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Ok(reply.into()),
        }
    }

    /// A generator whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Err(message.into()),
        }
    }
}

#[async_trait]
impl TextGenerator for StaticGenerator {
    fn model_name(&self) -> &str {
        "static"
    }

    async fn generate(&self, _instructions: &str, _query: &str) -> Result<String> {
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(message) => bail!("{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_response() {
        let json = json!({
            "choices": [{ "message": { "role": "assistant", "content": "db.users.find({})" } }]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), "db.users.find({})");
    }

    #[test]
    fn test_parse_openai_response_missing_content() {
        let json = json!({ "choices": [] });
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn test_unknown_provider() {
        let config = GeneratorConfig {
            provider: "gemini".to_string(),
            ..GeneratorConfig::default()
        };
        let err = create_generator(&config).err().unwrap();
        assert!(err.to_string().contains("gemini"));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = GeneratorConfig {
            provider: "ollama".to_string(),
            model: "llama3".to_string(),
            ..GeneratorConfig::default()
        };
        let generator = create_generator(&config).unwrap();
        assert_eq!(generator.model_name(), "llama3");
    }

    #[tokio::test]
    async fn test_static_generator() {
        let ok = StaticGenerator::new("db.users.find({})");
        assert_eq!(ok.generate("", "anything").await.unwrap(), "db.users.find({})");

        let failing = StaticGenerator::failing("quota exceeded");
        let err = failing.generate("", "anything").await.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
    }
}
