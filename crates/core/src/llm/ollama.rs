use crate::config::Settings;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::{Provider, ProviderGateway, SYSTEM_PROMPT};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const TEMPERATURE: f64 = 0.7;
const TOP_P: f64 = 0.9;
const NUM_PREDICT: u32 = 1500;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let timeout_secs = std::env::var("OLLAMA_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            base_url: settings.ollama_base_url.clone(),
            model: settings.ollama_model.clone(),
        })
    }

    async fn generate(&self, prompt: &str, model: &str) -> anyhow::Result<String> {
        // /api/generate has no separate system role; prepend the instruction.
        let full_prompt = format!("{SYSTEM_PROMPT}\n\n{prompt}");
        let req = GenerateRequest {
            model,
            prompt: &full_prompt,
            stream: false,
            options: GenerateOptions {
                temperature: TEMPERATURE,
                top_p: TOP_P,
                num_predict: NUM_PREDICT,
            },
        };

        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .json(&req)
            .send()
            .await
            .context("Ollama request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Ollama response body")?;
        if !status.is_success() {
            return Err(LlmDiagnosticsError {
                provider: Provider::Ollama,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
            }
            .into());
        }

        let parsed = serde_json::from_str::<GenerateResponse>(&text)
            .context("failed to decode Ollama generate response")?;
        Ok(parsed.response.trim().to_string())
    }
}

#[async_trait::async_trait]
impl ProviderGateway for OllamaClient {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    async fn query(&self, prompt: &str, model_override: Option<&str>) -> Option<String> {
        let model = model_override.unwrap_or(&self.model);
        match self.generate(prompt, model).await {
            Ok(text) => Some(text),
            Err(err) => {
                tracing::error!(provider = %Provider::Ollama, model, error = %format!("{err:#}"), "AI query failed");
                None
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
    top_p: f64,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}
