pub mod error;
pub mod json;
pub mod ollama;
pub mod openai;

use crate::config::Settings;
use std::fmt;
use std::sync::Arc;

/// System instruction shared by both provider paths.
pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant specializing in nutrition, meal planning, and healthy cooking. Provide structured, practical advice.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Ollama => "ollama",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait::async_trait]
pub trait ProviderGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Sends one prompt to the configured provider and returns the trimmed
    /// response text. Every transport, API, and decode failure is caught
    /// inside, logged, and collapsed to `None`; nothing crosses this boundary
    /// as an error.
    async fn query(&self, prompt: &str, model_override: Option<&str>) -> Option<String>;
}

/// Selects and constructs the provider client once at startup.
pub fn gateway_from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn ProviderGateway>> {
    match settings.ai_provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiClient::from_settings(settings)?)),
        "ollama" => Ok(Arc::new(ollama::OllamaClient::from_settings(settings)?)),
        other => anyhow::bail!("unsupported AI provider '{other}' (supported: openai, ollama)"),
    }
}
