//! Model backends: rig-core for OpenAI-compatible servers, raw reqwest for
//! the Anthropic Messages API, and scripted replay.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use coordination::battle::{BackendError, GenerationRequest, ModelBackend, ScriptedBackend};
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use serde::Deserialize;
use tracing::debug;

use crate::config::{Endpoint, Provider};

/// `anthropic-version` header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// OpenAI-compatible chat completions through rig.
///
/// A rig agent is built per request so the persona's system prompt and
/// sampling settings travel with each call; the HTTP client is shared.
pub struct RigBackend {
    client: openai::CompletionsClient,
    model: String,
}

impl RigBackend {
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        // Local vLLM / llama.cpp servers accept any key.
        let api_key = if endpoint.api_key.is_empty() {
            "not-needed"
        } else {
            endpoint.api_key.as_str()
        };
        let client = openai::CompletionsClient::builder()
            .api_key(api_key)
            .base_url(&endpoint.url)
            .build()
            .with_context(|| format!("Failed to build CompletionsClient for {}", endpoint.url))?;
        Ok(Self {
            client,
            model: endpoint.model.clone(),
        })
    }
}

#[async_trait]
impl ModelBackend for RigBackend {
    fn model_id(&self) -> String {
        self.model.clone()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(&request.system)
            .temperature(request.temperature)
            .max_tokens(u64::from(request.max_tokens))
            .build();
        agent
            .prompt(request.prompt.as_str())
            .await
            .map_err(|e| BackendError::Other(e.to_string()))
    }
}

/// Anthropic Messages API over reqwest.
pub struct AnthropicBackend {
    client: reqwest::Client,
    messages_url: String,
    api_key: String,
    model: String,
}

impl AnthropicBackend {
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        if endpoint.api_key.is_empty() {
            anyhow::bail!(
                "Anthropic endpoint {} has no API key (set ANTHROPIC_API_KEY or the role's BATTLE_*_API_KEY)",
                endpoint.url
            );
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build reqwest client")?;
        Ok(Self {
            client,
            messages_url: format!("{}/messages", endpoint.url.trim_end_matches('/')),
            api_key: endpoint.api_key.clone(),
            model: endpoint.model.clone(),
        })
    }
}

/// Messages API request body for one generation.
pub fn anthropic_request_body(model: &str, request: &GenerationRequest) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "system": request.system,
        "messages": [{
            "role": "user",
            "content": request.prompt,
        }]
    })
}

/// Concatenated text blocks of a Messages API response.
pub fn anthropic_response_text(resp_json: &serde_json::Value) -> Result<String, BackendError> {
    let blocks = resp_json["content"]
        .as_array()
        .ok_or_else(|| BackendError::Other(format!("response has no content array: {resp_json}")))?;
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b["type"].as_str().unwrap_or("text") == "text")
        .filter_map(|b| b["text"].as_str())
        .collect();
    let text = text.join("\n");
    if text.trim().is_empty() {
        return Err(BackendError::Empty);
    }
    Ok(text)
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn model_id(&self) -> String {
        self.model.clone()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let body = anthropic_request_body(&self.model, request);
        let response = self
            .client
            .post(&self.messages_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::Other(format!("invalid response JSON: {e}")))?;
        debug!(
            model = %self.model,
            stop_reason = resp_json["stop_reason"].as_str().unwrap_or("unknown"),
            "Anthropic response"
        );
        anthropic_response_text(&resp_json)
    }
}

/// Build the backend for an endpoint.
pub fn build_backend(endpoint: &Endpoint) -> Result<Arc<dyn ModelBackend>> {
    Ok(match endpoint.provider {
        Provider::OpenaiCompatible => Arc::new(RigBackend::new(endpoint)?),
        Provider::Anthropic => Arc::new(AnthropicBackend::new(endpoint)?),
    })
}

/// Fixed outputs for both sides, for deterministic replays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReplayScript {
    pub evaluator: Vec<String>,
    pub respondent: Vec<String>,
}

impl ReplayScript {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay script {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse replay script {}", path.display()))
    }

    /// Scripted evaluator and respondent backends.
    pub fn backends(&self) -> (Arc<ScriptedBackend>, Arc<ScriptedBackend>) {
        (
            Arc::new(ScriptedBackend::new(
                "replay-evaluator",
                self.evaluator.iter().cloned(),
            )),
            Arc::new(ScriptedBackend::new(
                "replay-respondent",
                self.respondent.iter().cloned(),
            )),
        )
    }
}
