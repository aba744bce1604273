//! Battle orchestrator: drives the evaluator/respondent exchange.
//!
//! Ties together the state machine, the renderer, the decision extractor,
//! refusal detection and the guardrails to run one battle end-to-end.
//! Turns are strictly sequential; separate battles share nothing and may
//! run concurrently.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::agent::{Agent, TurnKind};
use super::decision::{extract_decision, Decision, ParseRecovery, Verdict, REPROMPT_NOTICE};
use super::envelope::Envelope;
use super::guardrails::{GuardrailOutcome, Guardrails};
use super::message::{Clock, Role, SystemClock};
use super::outcome::Outcome;
use super::refusal::{CompositeDetector, RefusalDetector};
use super::render::{ContextRenderer, RenderOrder};
use super::retry::{call_with_retry, BackendError, RetryPolicy};
use super::state::{BattlePhase, StateError, ThreadState};

/// Body sent when a follow-up decision carries no message text.
pub const DEFAULT_FOLLOW_UP_BODY: &str =
    "Your reply lacks specifics. Provide concrete, verifiable details for each item.";

/// Settings for one battle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BattleConfig {
    pub guardrails: Guardrails,
    pub retry: RetryPolicy,
    pub parse_recovery: ParseRecovery,
    pub render_order: RenderOrder,
    pub envelope: Envelope,
}

/// Public result of a completed battle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleReport {
    pub battle_id: Uuid,
    pub thread: ThreadState,
    pub outcome: Outcome,
    pub evaluator_model: String,
    pub respondent_model: String,
}

/// A battle that did not produce an outcome.
#[derive(Debug, Error)]
pub enum BattleError {
    #[error("{role} backend failed on {turn} turn (round {round}) after {attempts} attempt(s): {source}")]
    Backend {
        role: Role,
        turn: TurnKind,
        round: u32,
        attempts: u32,
        source: BackendError,
    },

    #[error("state machine misuse: {0}")]
    State(#[from] StateError),

    #[error("battle cancelled")]
    Cancelled,
}

/// Runs one battle between two agents.
pub struct BattleOrchestrator {
    battle_id: Uuid,
    evaluator: Agent,
    respondent: Agent,
    config: BattleConfig,
    detector: Arc<dyn RefusalDetector>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl BattleOrchestrator {
    pub fn new(evaluator: Agent, respondent: Agent, config: BattleConfig) -> Self {
        Self {
            battle_id: Uuid::new_v4(),
            evaluator,
            respondent,
            config,
            detector: Arc::new(CompositeDetector::standard()),
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_refusal_detector(mut self, detector: impl RefusalDetector + 'static) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_battle_id(mut self, battle_id: Uuid) -> Self {
        self.battle_id = battle_id;
        self
    }

    pub fn battle_id(&self) -> Uuid {
        self.battle_id
    }

    pub fn config(&self) -> &BattleConfig {
        &self.config
    }

    /// Token that aborts the battle when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the battle to completion.
    ///
    /// Returns a report with a populated outcome, or an error naming the
    /// failed role and turn. Never a partial result.
    pub async fn run(&self) -> Result<BattleReport, BattleError> {
        let mut state = ThreadState::new(self.config.guardrails.max_rounds);
        let start = Instant::now();
        let clock = self.clock.as_ref();
        let envelope = &self.config.envelope;

        info!(
            battle = %self.battle_id,
            max_rounds = state.max_rounds,
            evaluator_model = %self.evaluator.model_id(),
            respondent_model = %self.respondent.model_id(),
            "Battle starting"
        );

        // INIT → MASS_MESSAGE_SENT
        let Some(opening) = self
            .call_agent(&mut state, start, TurnKind::Open, None)
            .await?
        else {
            return self.finish(state);
        };
        state.append(envelope.opening(opening.trim().to_string()), clock)?;
        state.transition(BattlePhase::MassMessageSent, "opening broadcast sent", clock)?;

        // MASS_MESSAGE_SENT → INITIAL_RESPONSE_RECEIVED
        if !self
            .respondent_turn(&mut state, start, BattlePhase::InitialResponseReceived)
            .await?
        {
            return self.finish(state);
        }
        state.transition(BattlePhase::Evaluating, "evaluating initial reply", clock)?;

        loop {
            let Some(decision) = self.evaluate(&mut state, start).await? else {
                break;
            };
            info!(
                battle = %self.battle_id,
                round = state.round,
                verdict = %decision.verdict,
                source = ?decision.source,
                "Evaluator decision"
            );
            state.record_decision(decision.clone())?;

            if decision.verdict.is_terminal() {
                if decision.verdict == Verdict::Terminated && decision.has_reply() {
                    state.append(envelope.termination(decision.reply_body.clone()), clock)?;
                }
                state.conclude(&format!("verdict {}", decision.verdict), clock)?;
                break;
            }

            // FOLLOW_UP: deadline first, then the round ceiling.
            let guard = self.config.guardrails.evaluate(&state, start.elapsed());
            if matches!(guard, GuardrailOutcome::TimeoutExceeded { .. }) {
                let detail = guard.to_string();
                self.conclude_on_deadline(&mut state, TurnKind::FollowUpReply, &detail)?;
                break;
            }
            if guard.should_stop() || !state.advance_round() {
                info!(
                    battle = %self.battle_id,
                    round = state.round,
                    guardrail = %guard,
                    "Follow-up refused by round ceiling"
                );
                state.conclude("max rounds reached", clock)?;
                break;
            }

            let body = if decision.has_reply() {
                decision.reply_body.clone()
            } else {
                DEFAULT_FOLLOW_UP_BODY.to_string()
            };
            let thread_len = state.messages.len();
            state.append(envelope.reply(Role::Evaluator, thread_len, body), clock)?;
            state.transition(
                BattlePhase::FollowUp,
                &format!("follow-up {} sent", state.round),
                clock,
            )?;

            if !self
                .respondent_turn(&mut state, start, BattlePhase::Evaluating)
                .await?
            {
                break;
            }
        }

        self.finish(state)
    }

    /// Respondent reply, then refusal check. Returns `false` when the
    /// battle concluded during the turn.
    async fn respondent_turn(
        &self,
        state: &mut ThreadState,
        start: Instant,
        next_phase: BattlePhase,
    ) -> Result<bool, BattleError> {
        let clock = self.clock.as_ref();
        let kind = TurnKind::reply(state.round);
        let Some(reply) = self.call_agent(state, start, kind, None).await? else {
            return Ok(false);
        };

        let thread_len = state.messages.len();
        state.append(
            self.config
                .envelope
                .reply(Role::Respondent, thread_len, reply.trim().to_string()),
            clock,
        )?;
        state.transition(next_phase, &format!("{kind} received"), clock)?;

        if let Some(signal) = self.detector.detect(&reply) {
            warn!(
                battle = %self.battle_id,
                round = state.round,
                detector = %signal.detector,
                evidence = %signal.evidence,
                "Respondent refused, concluding"
            );
            state.mark_refusal();
            state.conclude(&format!("refusal ({})", signal.detector), clock)?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Evaluator turn plus decision extraction, with the parse recovery
    /// policy applied. `None` when the deadline concluded the battle.
    async fn evaluate(
        &self,
        state: &mut ThreadState,
        start: Instant,
    ) -> Result<Option<Decision>, BattleError> {
        let kind = TurnKind::evaluation(state.round);
        let mut reprompts = 0;
        loop {
            let notice = (reprompts > 0).then_some(REPROMPT_NOTICE);
            let Some(raw) = self.call_agent(state, start, kind, notice).await? else {
                return Ok(None);
            };
            match extract_decision(&raw) {
                Ok(decision) => return Ok(Some(decision)),
                Err(failure) if reprompts < self.config.parse_recovery.reprompt_attempts => {
                    reprompts += 1;
                    warn!(
                        battle = %self.battle_id,
                        round = state.round,
                        reprompt = reprompts,
                        reason = %failure.reason,
                        "Unparseable evaluator reply, re-prompting"
                    );
                }
                Err(failure) => {
                    warn!(
                        battle = %self.battle_id,
                        round = state.round,
                        reason = %failure.reason,
                        "Unparseable evaluator reply, falling back to FOLLOW_UP"
                    );
                    return Ok(Some(Decision::fallback(&failure.raw)));
                }
            }
        }
    }

    /// One agent call under retry, deadline and cancellation.
    ///
    /// `None` means the deadline fired and the battle is now concluded.
    async fn call_agent(
        &self,
        state: &mut ThreadState,
        start: Instant,
        kind: TurnKind,
        notice: Option<&str>,
    ) -> Result<Option<String>, BattleError> {
        if self.cancel.is_cancelled() {
            return Err(BattleError::Cancelled);
        }
        debug_assert!(state.round <= state.max_rounds);

        let guard = self.config.guardrails.check_deadline(start.elapsed());
        if guard.should_stop() {
            return self.conclude_on_deadline(state, kind, &guard.to_string());
        }

        let role = kind.speaker();
        let agent = match role {
            Role::Evaluator => &self.evaluator,
            Role::Respondent => &self.respondent,
        };
        let context = ContextRenderer::new(self.config.render_order).render(&state.messages, role);
        let mut request = agent.request(kind, &context);
        if let Some(notice) = notice {
            request.prompt.push_str("\n\n");
            request.prompt.push_str(notice);
        }
        debug!(
            battle = %self.battle_id,
            role = %role,
            turn = %kind,
            round = state.round,
            prompt_chars = request.prompt.len(),
            "Calling agent"
        );

        let label = format!("{role}:{kind}");
        let req = &request;
        let call = call_with_retry(&self.config.retry, &label, move || agent.send(req));
        let bounded = async {
            match self.config.guardrails.remaining(start.elapsed()) {
                Some(left) => tokio::time::timeout(left, call).await.ok(),
                None => Some(call.await),
            }
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                warn!(battle = %self.battle_id, turn = %kind, "Battle cancelled mid-call");
                return Err(BattleError::Cancelled);
            }
            result = bounded => result,
        };

        match result {
            None => self.conclude_on_deadline(state, kind, "deadline fired during call"),
            Some(Ok(text)) => Ok(Some(text)),
            Some(Err(exhausted)) => Err(BattleError::Backend {
                role,
                turn: kind,
                round: state.round,
                attempts: exhausted.attempts,
                source: exhausted.source,
            }),
        }
    }

    fn conclude_on_deadline(
        &self,
        state: &mut ThreadState,
        kind: TurnKind,
        detail: &str,
    ) -> Result<Option<String>, BattleError> {
        warn!(
            battle = %self.battle_id,
            round = state.round,
            turn = %kind,
            detail,
            "Battle deadline exceeded"
        );
        state.mark_deadline_exceeded();
        state.conclude(&format!("deadline exceeded before {kind}"), self.clock.as_ref())?;
        Ok(None)
    }

    fn finish(&self, state: ThreadState) -> Result<BattleReport, BattleError> {
        let outcome = state
            .outcome
            .clone()
            .ok_or(StateError::NotConcluded { phase: state.phase })?;
        info!(
            battle = %self.battle_id,
            kind = %outcome.kind,
            winner = %outcome.winner,
            rounds = outcome.total_rounds,
            messages = outcome.total_messages,
            "Battle concluded"
        );
        Ok(BattleReport {
            battle_id: self.battle_id,
            thread: state,
            outcome,
            evaluator_model: self.evaluator.model_id(),
            respondent_model: self.respondent.model_id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::battle::agent::{GenerationRequest, ModelBackend, Persona, ScriptedBackend};
    use crate::battle::message::{FixedClock, Participant};
    use crate::battle::outcome::{OutcomeKind, Winner};
    use async_trait::async_trait;

    fn verdict(v: &str, body: &str) -> String {
        serde_json::json!({"decision": v, "email_body": body, "reasoning": "test"}).to_string()
    }

    fn agent(role: Role, backend: Arc<dyn ModelBackend>) -> Agent {
        let env = Envelope::default();
        Agent::new(
            Persona::new(role, env.participant(role).clone(), format!("You are the {role}.")),
            backend,
        )
    }

    fn orchestrator(
        evaluator: Arc<dyn ModelBackend>,
        respondent: Arc<dyn ModelBackend>,
        config: BattleConfig,
    ) -> BattleOrchestrator {
        BattleOrchestrator::new(
            agent(Role::Evaluator, evaluator),
            agent(Role::Respondent, respondent),
            config,
        )
        .with_clock(Arc::new(FixedClock::starting_at_epoch_morning()))
    }

    /// Never answers.
    struct HangingBackend;

    #[async_trait]
    impl ModelBackend for HangingBackend {
        fn model_id(&self) -> String {
            "hanging".into()
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String, BackendError> {
            std::future::pending().await
        }
    }

    /// Scripted replies, each delivered after its matching delay.
    struct DelayedBackend {
        inner: ScriptedBackend,
        delays: Vec<Duration>,
    }

    #[async_trait]
    impl ModelBackend for DelayedBackend {
        fn model_id(&self) -> String {
            self.inner.model_id()
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
            let delay = self.delays.get(self.inner.call_count()).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.generate(request).await
        }
    }

    #[tokio::test]
    async fn test_follow_up_without_body_uses_default() {
        let evaluator = Arc::new(ScriptedBackend::new(
            "eval",
            [
                "Open".to_string(),
                "DECISION: FOLLOW_UP".to_string(),
                verdict("PASS", ""),
            ],
        ));
        let respondent = Arc::new(ScriptedBackend::new("resp", ["Reply one", "Reply two"]));
        let report = orchestrator(evaluator, respondent, BattleConfig::default())
            .run()
            .await
            .unwrap();
        assert_eq!(report.thread.messages[2].body, DEFAULT_FOLLOW_UP_BODY);
        assert_eq!(report.outcome.kind, OutcomeKind::Pass);
    }

    #[tokio::test]
    async fn test_reprompt_before_fallback() {
        let evaluator = Arc::new(ScriptedBackend::new(
            "eval",
            [
                "Open".to_string(),
                "I am thinking about it.".to_string(),
                verdict("RETAINED", ""),
            ],
        ));
        let respondent = Arc::new(ScriptedBackend::new("resp", ["Reply"]));
        let config = BattleConfig {
            parse_recovery: ParseRecovery {
                reprompt_attempts: 1,
            },
            ..BattleConfig::default()
        };
        let report = orchestrator(evaluator.clone(), respondent, config)
            .run()
            .await
            .unwrap();

        assert_eq!(report.outcome.kind, OutcomeKind::Retained);
        assert_eq!(report.outcome.winner, Winner::Respondent);
        let calls = evaluator.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[2].prompt.ends_with(REPROMPT_NOTICE));
    }

    #[tokio::test]
    async fn test_backend_failure_names_role_and_turn() {
        let evaluator = Arc::new(ScriptedBackend::new(
            "eval",
            ["Open".to_string(), verdict("PASS", "")],
        ));
        let respondent = Arc::new(ScriptedBackend::with_results(
            "resp",
            [Err(BackendError::Http {
                status: 401,
                message: "unauthorized".into(),
            })],
        ));
        let err = orchestrator(evaluator, respondent, BattleConfig::default())
            .run()
            .await
            .unwrap_err();
        match err {
            BattleError::Backend {
                role,
                turn,
                round,
                attempts,
                ..
            } => {
                assert_eq!(role, Role::Respondent);
                assert_eq!(turn, TurnKind::InitialReply);
                assert_eq!(round, 0);
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_call_concludes_with_timeout() {
        let evaluator = Arc::new(ScriptedBackend::new("eval", ["Open"]));
        let config = BattleConfig {
            guardrails: Guardrails::default().with_deadline(Duration::from_secs(30)),
            ..BattleConfig::default()
        };
        let report = orchestrator(evaluator, Arc::new(HangingBackend), config)
            .run()
            .await
            .unwrap();

        assert_eq!(report.outcome.kind, OutcomeKind::Timeout);
        assert_eq!(report.outcome.winner, Winner::Draw);
        assert_eq!(report.outcome.total_messages, 1);
        assert!(report.thread.deadline_exceeded);
        assert_eq!(report.thread.phase, BattlePhase::Concluded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_spent_between_calls_skips_next_call() {
        // The opening call returns exactly at the deadline; the reply is never requested.
        let evaluator = Arc::new(DelayedBackend {
            inner: ScriptedBackend::new("eval", ["Open"]),
            delays: vec![Duration::from_secs(30)],
        });
        let respondent = Arc::new(ScriptedBackend::new("resp", ["Reply"]));
        let config = BattleConfig {
            guardrails: Guardrails::default().with_deadline(Duration::from_secs(30)),
            ..BattleConfig::default()
        };
        let report = orchestrator(evaluator, respondent.clone(), config)
            .run()
            .await
            .unwrap();

        assert_eq!(report.outcome.kind, OutcomeKind::Timeout);
        assert_eq!(report.outcome.total_messages, 1);
        assert_eq!(respondent.call_count(), 0);
        assert!(report.thread.deadline_exceeded);
        let last = report.thread.transitions.last().unwrap();
        assert_eq!(last.reason, "deadline exceeded before initial_reply");
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_up_at_deadline_concludes_with_timeout() {
        let evaluator = Arc::new(DelayedBackend {
            inner: ScriptedBackend::new(
                "eval",
                ["Open".to_string(), verdict("FOLLOW_UP", "Which cases?")],
            ),
            delays: vec![Duration::ZERO, Duration::from_secs(30)],
        });
        let respondent = Arc::new(ScriptedBackend::new("resp", ["Reply", "More"]));
        let config = BattleConfig {
            guardrails: Guardrails::default().with_deadline(Duration::from_secs(30)),
            ..BattleConfig::default()
        };
        let report = orchestrator(evaluator, respondent.clone(), config)
            .run()
            .await
            .unwrap();

        // Deadline wins over the round ceiling: no follow-up is appended.
        assert_eq!(report.outcome.kind, OutcomeKind::Timeout);
        assert_eq!(report.outcome.total_messages, 2);
        assert_eq!(report.outcome.total_rounds, 0);
        assert_eq!(respondent.call_count(), 1);
        let last = report.thread.transitions.last().unwrap();
        assert_eq!(last.reason, "deadline exceeded before follow_up_reply");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_returns_error() {
        let evaluator = Arc::new(ScriptedBackend::new("eval", ["Open"]));
        let orch = orchestrator(evaluator, Arc::new(HangingBackend), BattleConfig::default());
        let token = orch.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        });
        let err = orch.run().await.unwrap_err();
        assert!(matches!(err, BattleError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_calls() {
        let evaluator = Arc::new(ScriptedBackend::new("eval", ["Open"]));
        let orch = orchestrator(
            evaluator.clone(),
            Arc::new(ScriptedBackend::new("resp", Vec::<String>::new())),
            BattleConfig::default(),
        );
        orch.cancellation_token().cancel();
        assert!(matches!(orch.run().await, Err(BattleError::Cancelled)));
        assert_eq!(evaluator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_report_carries_models_and_id() {
        let id = Uuid::new_v4();
        let evaluator = Arc::new(ScriptedBackend::new(
            "eval-model",
            ["Open".to_string(), verdict("PASS", "")],
        ));
        let respondent = Arc::new(ScriptedBackend::new("resp-model", ["Reply"]));
        let report = orchestrator(evaluator, respondent, BattleConfig::default())
            .with_battle_id(id)
            .run()
            .await
            .unwrap();
        assert_eq!(report.battle_id, id);
        assert_eq!(report.evaluator_model, "eval-model");
        assert_eq!(report.respondent_model, "resp-model");
        assert_eq!(
            report.thread.messages[0].from,
            Participant::new("Dana Reyes", "dana.reyes@efficiency-office.gov").mailbox()
        );
    }

    #[test]
    fn test_backend_error_display() {
        let err = BattleError::Backend {
            role: Role::Evaluator,
            turn: TurnKind::FollowUpEvaluation,
            round: 2,
            attempts: 3,
            source: BackendError::Timeout(Duration::from_secs(120)),
        };
        let text = err.to_string();
        assert!(text.contains("follow_up_evaluation"));
        assert!(text.contains("round 2"));
        assert!(text.contains("3 attempt"));
    }
}
