//! Agent capability: a persona bound to a model backend.
//!
//! Agents keep no state between calls. Every turn is a pure function of the
//! rendered thread handed in, so backend-side session memory is never relied
//! upon.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::message::{Participant, Role};
use super::retry::BackendError;

/// Placeholder substituted with the rendered thread.
pub const THREAD_CONTEXT_PLACEHOLDER: &str = "{thread_context}";

/// Which instruction a persona uses for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// Evaluator's opening broadcast.
    Open,
    /// Respondent's answer to the broadcast.
    InitialReply,
    /// Evaluator judging the first reply.
    InitialEvaluation,
    /// Respondent answering a follow-up.
    FollowUpReply,
    /// Evaluator judging a follow-up reply.
    FollowUpEvaluation,
}

impl TurnKind {
    pub fn reply(round: u32) -> Self {
        if round == 0 {
            Self::InitialReply
        } else {
            Self::FollowUpReply
        }
    }

    pub fn evaluation(round: u32) -> Self {
        if round == 0 {
            Self::InitialEvaluation
        } else {
            Self::FollowUpEvaluation
        }
    }

    /// Role that speaks on this turn.
    pub fn speaker(self) -> Role {
        match self {
            Self::Open | Self::InitialEvaluation | Self::FollowUpEvaluation => Role::Evaluator,
            Self::InitialReply | Self::FollowUpReply => Role::Respondent,
        }
    }
}

impl std::fmt::Display for TurnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::InitialReply => write!(f, "initial_reply"),
            Self::InitialEvaluation => write!(f, "initial_evaluation"),
            Self::FollowUpReply => write!(f, "follow_up_reply"),
            Self::FollowUpEvaluation => write!(f, "follow_up_evaluation"),
        }
    }
}

/// Static persona configuration for one side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub role: Role,
    pub participant: Participant,
    pub system_prompt: String,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub objective: String,
    /// Per-turn instructions. May contain `{thread_context}`.
    #[serde(default)]
    pub instructions: BTreeMap<TurnKind, String>,
}

impl Persona {
    pub fn new(role: Role, participant: Participant, system_prompt: impl Into<String>) -> Self {
        Self {
            role,
            participant,
            system_prompt: system_prompt.into(),
            tone: String::new(),
            objective: String::new(),
            instructions: BTreeMap::new(),
        }
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = tone.into();
        self
    }

    pub fn with_objective(mut self, objective: impl Into<String>) -> Self {
        self.objective = objective.into();
        self
    }

    pub fn with_instruction(mut self, kind: TurnKind, text: impl Into<String>) -> Self {
        self.instructions.insert(kind, text.into());
        self
    }

    /// System prompt with tone and objective folded in.
    pub fn system_text(&self) -> String {
        let mut out = self.system_prompt.trim().to_string();
        if !self.objective.trim().is_empty() {
            out.push_str("\n\nObjective: ");
            out.push_str(self.objective.trim());
        }
        if !self.tone.trim().is_empty() {
            out.push_str("\n\nTone: ");
            out.push_str(self.tone.trim());
        }
        out
    }

    /// User prompt for a turn.
    ///
    /// The rendered thread replaces `{thread_context}` when the instruction
    /// has one, and is appended after a blank line otherwise.
    pub fn prompt_for(&self, kind: TurnKind, thread_context: &str) -> String {
        let instruction = self
            .instructions
            .get(&kind)
            .map(|s| s.trim())
            .unwrap_or_default();

        if instruction.contains(THREAD_CONTEXT_PLACEHOLDER) {
            return instruction.replace(THREAD_CONTEXT_PLACEHOLDER, thread_context);
        }
        match (instruction.is_empty(), thread_context.is_empty()) {
            (true, _) => thread_context.to_string(),
            (false, true) => instruction.to_string(),
            (false, false) => format!("{instruction}\n\n{thread_context}"),
        }
    }
}

/// Input to one backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Text-generation capability behind an agent.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Identifier of the model serving this backend, for reports.
    fn model_id(&self) -> String;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError>;
}

/// A persona bound to a backend.
#[derive(Clone)]
pub struct Agent {
    persona: Persona,
    backend: Arc<dyn ModelBackend>,
    temperature: f64,
    max_tokens: u32,
}

impl Agent {
    pub fn new(persona: Persona, backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            persona,
            backend,
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn role(&self) -> Role {
        self.persona.role
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn model_id(&self) -> String {
        self.backend.model_id()
    }

    /// Build the request for a turn without sending it.
    pub fn request(&self, kind: TurnKind, thread_context: &str) -> GenerationRequest {
        GenerationRequest {
            system: self.persona.system_text(),
            prompt: self.persona.prompt_for(kind, thread_context),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// One outbound call. No retry here.
    pub async fn send(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        self.backend.generate(request).await
    }

    pub async fn respond(
        &self,
        kind: TurnKind,
        thread_context: &str,
    ) -> Result<String, BackendError> {
        self.send(&self.request(kind, thread_context)).await
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("role", &self.persona.role)
            .field("model", &self.backend.model_id())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Backend that replays a fixed sequence of results.
///
/// Records every request it receives. Once the script runs out each call
/// fails with [`BackendError::Config`].
pub struct ScriptedBackend {
    model: String,
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(model: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(model, outputs.into_iter().map(|s| Ok(s.into())))
    }

    pub fn with_results<I>(model: impl Into<String>, results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, BackendError>>,
    {
        Self {
            model: model.into(),
            script: Mutex::new(results.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn model_id(&self) -> String {
        self.model.clone()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        let next = self
            .script
            .lock()
            .map_err(|_| BackendError::Config("script lock poisoned".into()))?
            .pop_front();
        next.unwrap_or_else(|| Err(BackendError::Config("script exhausted".into())))
    }
}
