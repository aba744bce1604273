use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::battle::{
    BattleConfig, CompositeDetector, Envelope, Guardrails, ParseRecovery, Persona,
    PhraseDetector, PlaceholderDetector, RenderOrder, RetryPolicy, DEFAULT_MAX_ROUNDS,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::prompts;

/// Wire protocol of a model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenAI chat completions (OpenAI, vLLM, llama.cpp server, ...).
    OpenaiCompatible,
    /// Anthropic Messages API.
    Anthropic,
}

impl Provider {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "openai" | "openai_compatible" | "vllm" => Some(Self::OpenaiCompatible),
            "anthropic" | "claude" => Some(Self::Anthropic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenaiCompatible => write!(f, "openai_compatible"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// One side's model endpoint.
#[derive(Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub provider: Provider,
    pub url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Top-level battle configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleSettings {
    pub evaluator: Endpoint,
    pub respondent: Endpoint,
    pub max_rounds: u32,
    pub retry: RetryPolicy,
    /// Wall-clock budget for a whole battle.
    pub deadline_secs: Option<u64>,
    pub reprompt_attempts: u32,
    pub newest_first: bool,
    pub extra_refusal_phrases: Vec<String>,
    /// TOML or JSON file replacing the default evaluator persona.
    pub evaluator_persona: Option<PathBuf>,
    pub respondent_persona: Option<PathBuf>,
    pub output_dir: PathBuf,
}

impl Default for BattleSettings {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl BattleSettings {
    /// Build defaults from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let num = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        let endpoint = |role: &str,
                        provider: Provider,
                        url: &str,
                        model: &str,
                        key_fallback: &str| Endpoint {
            provider: var(&format!("BATTLE_{role}_PROVIDER"))
                .and_then(|v| Provider::parse(&v))
                .unwrap_or(provider),
            url: var(&format!("BATTLE_{role}_URL")).unwrap_or_else(|| url.into()),
            model: var(&format!("BATTLE_{role}_MODEL")).unwrap_or_else(|| model.into()),
            api_key: var(&format!("BATTLE_{role}_API_KEY"))
                .or_else(|| var(key_fallback))
                .unwrap_or_default(),
            temperature: var(&format!("BATTLE_{role}_TEMPERATURE"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0.7),
            max_tokens: num(&format!("BATTLE_{role}_MAX_TOKENS"))
                .map(|v| v as u32)
                .unwrap_or(1024),
        };

        let retry = RetryPolicy::default();
        Self {
            evaluator: endpoint(
                "EVALUATOR",
                Provider::OpenaiCompatible,
                "https://api.openai.com/v1",
                "gpt-4o",
                "OPENAI_API_KEY",
            ),
            respondent: endpoint(
                "RESPONDENT",
                Provider::Anthropic,
                "https://api.anthropic.com/v1",
                "claude-sonnet-4-20250514",
                "ANTHROPIC_API_KEY",
            ),
            max_rounds: num("BATTLE_MAX_ROUNDS")
                .map(|v| v as u32)
                .unwrap_or(DEFAULT_MAX_ROUNDS),
            retry: RetryPolicy {
                max_attempts: num("BATTLE_MAX_ATTEMPTS")
                    .map(|v| v as u32)
                    .unwrap_or(retry.max_attempts),
                ..retry
            },
            deadline_secs: num("BATTLE_DEADLINE_SECS"),
            reprompt_attempts: 0,
            newest_first: false,
            extra_refusal_phrases: Vec::new(),
            evaluator_persona: None,
            respondent_persona: None,
            output_dir: var("BATTLE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("battles")),
        }
    }

    /// Environment defaults overlaid with a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = Self::default();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let file: SettingsFile = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        settings.apply(file);
        Ok(settings)
    }

    pub fn apply(&mut self, file: SettingsFile) {
        if let Some(e) = file.evaluator {
            e.apply_to(&mut self.evaluator);
        }
        if let Some(e) = file.respondent {
            e.apply_to(&mut self.respondent);
        }
        if let Some(v) = file.max_rounds {
            self.max_rounds = v;
        }
        if let Some(r) = file.retry {
            if let Some(v) = r.max_attempts {
                self.retry.max_attempts = v;
            }
            if let Some(v) = r.base_backoff_secs {
                self.retry.base_backoff = Duration::from_secs_f64(v.max(0.0));
            }
            if let Some(v) = r.call_timeout_secs {
                self.retry.call_timeout = Duration::from_secs(v);
            }
        }
        if file.deadline_secs.is_some() {
            self.deadline_secs = file.deadline_secs;
        }
        if let Some(v) = file.reprompt_attempts {
            self.reprompt_attempts = v;
        }
        if let Some(v) = file.newest_first {
            self.newest_first = v;
        }
        self.extra_refusal_phrases
            .extend(file.extra_refusal_phrases.unwrap_or_default());
        if file.evaluator_persona.is_some() {
            self.evaluator_persona = file.evaluator_persona;
        }
        if file.respondent_persona.is_some() {
            self.respondent_persona = file.respondent_persona;
        }
        if let Some(v) = file.output_dir {
            self.output_dir = v;
        }
    }

    /// Core orchestrator settings.
    pub fn battle_config(&self) -> BattleConfig {
        let mut guardrails = Guardrails::default().with_max_rounds(self.max_rounds);
        if let Some(secs) = self.deadline_secs {
            guardrails = guardrails.with_deadline(Duration::from_secs(secs));
        }
        BattleConfig {
            guardrails,
            retry: self.retry,
            parse_recovery: ParseRecovery {
                reprompt_attempts: self.reprompt_attempts,
            },
            render_order: if self.newest_first {
                RenderOrder::NewestFirst
            } else {
                RenderOrder::OldestFirst
            },
            envelope: Envelope::default(),
        }
    }

    /// Phrase and placeholder detectors, with the configured extra phrases.
    pub fn refusal_detector(&self) -> CompositeDetector {
        let phrases = PhraseDetector::default().with_extra(&self.extra_refusal_phrases);
        debug!(
            phrases = phrases.phrases().len(),
            extra = self.extra_refusal_phrases.len(),
            "Refusal phrase list"
        );
        CompositeDetector::new()
            .with(phrases)
            .with(PlaceholderDetector::default())
    }

    /// Evaluator and respondent personas: defaults unless overridden by file.
    pub fn personas(&self, envelope: &Envelope) -> Result<(Persona, Persona)> {
        let evaluator = match &self.evaluator_persona {
            Some(path) => load_persona(path)?,
            None => prompts::evaluator_persona(envelope),
        };
        let respondent = match &self.respondent_persona {
            Some(path) => load_persona(path)?,
            None => prompts::respondent_persona(envelope),
        };
        Ok((evaluator, respondent))
    }
}

/// Load a persona from TOML, or JSON when the extension says so.
pub fn load_persona(path: &Path) -> Result<Persona> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read persona {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse persona {}", path.display()))
    } else {
        toml::from_str(&text).with_context(|| format!("Failed to parse persona {}", path.display()))
    }
}

/// Config file layout. Every field is optional and overrides the
/// environment defaults when present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub evaluator: Option<EndpointFile>,
    pub respondent: Option<EndpointFile>,
    pub max_rounds: Option<u32>,
    pub retry: Option<RetryFile>,
    pub deadline_secs: Option<u64>,
    pub reprompt_attempts: Option<u32>,
    pub newest_first: Option<bool>,
    pub extra_refusal_phrases: Option<Vec<String>>,
    pub evaluator_persona: Option<PathBuf>,
    pub respondent_persona: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointFile {
    pub provider: Option<Provider>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl EndpointFile {
    fn apply_to(self, endpoint: &mut Endpoint) {
        if let Some(v) = self.provider {
            endpoint.provider = v;
        }
        if let Some(v) = self.url {
            endpoint.url = v;
        }
        if let Some(v) = self.model {
            endpoint.model = v;
        }
        if let Some(v) = self.api_key {
            endpoint.api_key = v;
        }
        if let Some(v) = self.temperature {
            endpoint.temperature = v;
        }
        if let Some(v) = self.max_tokens {
            endpoint.max_tokens = v;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryFile {
    pub max_attempts: Option<u32>,
    pub base_backoff_secs: Option<f64>,
    pub call_timeout_secs: Option<u64>,
}

/// Check if an endpoint is reachable (GET {url}/models).
pub async fn check_endpoint(endpoint: &Endpoint) -> bool {
    let models_url = format!("{}/models", endpoint.url.trim_end_matches('/'));
    let mut request = reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5));
    request = match endpoint.provider {
        Provider::OpenaiCompatible if !endpoint.api_key.is_empty() => {
            request.bearer_auth(&endpoint.api_key)
        }
        Provider::Anthropic => request
            .header("x-api-key", &endpoint.api_key)
            .header("anthropic-version", crate::backends::ANTHROPIC_VERSION),
        _ => request,
    };
    match request.send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
