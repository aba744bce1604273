//! Email Battle: Evaluator/Respondent Adversarial Exchange
//!
//! State machine for a bounded email exchange between an evaluator agent
//! that judges and a respondent agent that is judged. Every turn re-renders
//! the full thread; no backend-side memory is relied upon.
//!
//! # Battle Flow
//!
//! ```text
//! Init → MassMessageSent → InitialResponseReceived → Evaluating
//!                 │                   │                   │
//!                 │                   └─ refusal ─────────┼──────────┐
//!                 │                                       │          │
//!                 │        ┌──── reply (refusal?) ────────┤          │
//!                 │        │                              │          │
//!                 │     FollowUp ◄── FOLLOW_UP, rounds left           │
//!                 │                                       │          │
//!                 │                PASS / RETAINED / TERMINATED       │
//!                 │                FOLLOW_UP at the round ceiling     ▼
//!                 └─ deadline at any point ─────────────────────► Concluded
//! ```
//!
//! `Concluded` resolves exactly one [`Outcome`]; after that the log accepts
//! no appends and the state machine no transitions.

pub mod agent;
pub mod decision;
pub mod envelope;
pub mod guardrails;
pub mod message;
pub mod orchestrator;
pub mod outcome;
pub mod persistence;
pub mod refusal;
pub mod render;
pub mod retry;
pub mod state;

pub use agent::{
    Agent, GenerationRequest, ModelBackend, Persona, ScriptedBackend, TurnKind,
    THREAD_CONTEXT_PLACEHOLDER,
};
pub use decision::{
    extract_decision, Decision, DecisionSource, ParseFailure, ParseRecovery, Verdict,
    REPROMPT_NOTICE,
};
pub use envelope::Envelope;
pub use guardrails::{GuardrailOutcome, Guardrails};
pub use message::{Clock, FixedClock, Message, MessageDraft, Participant, Role, SystemClock};
pub use orchestrator::{BattleConfig, BattleError, BattleOrchestrator, BattleReport};
pub use outcome::{resolve, Outcome, OutcomeKind, Winner};
pub use persistence::{validate_record, BattleRecord, IntegrityStatus, PersistenceError};
pub use refusal::{
    CompositeDetector, PhraseDetector, PlaceholderDetector, RefusalDetector, RefusalSignal,
    DEFAULT_REFUSAL_PHRASES,
};
pub use render::{ContextRenderer, RenderOrder};
pub use retry::{call_with_retry, is_transient_message, BackendError, RetryExhausted, RetryPolicy};
pub use state::{BattlePhase, PhaseTransition, StateError, ThreadState, DEFAULT_MAX_ROUNDS};
