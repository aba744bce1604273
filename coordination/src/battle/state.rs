//! Battle state machine: phases, transitions, and the threaded state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::decision::Decision;
use super::message::{Clock, Message, MessageDraft};
use super::outcome::{resolve, Outcome};

/// Default ceiling on follow-up rounds.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// Phase of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattlePhase {
    /// Nothing sent yet.
    Init,
    /// Evaluator's opening broadcast is in the log.
    MassMessageSent,
    /// Respondent answered the opening broadcast.
    InitialResponseReceived,
    /// Evaluator is judging the latest reply.
    Evaluating,
    /// A follow-up was sent; waiting for the respondent.
    FollowUp,
    /// Terminal.
    Concluded,
}

impl BattlePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Concluded)
    }

    /// Valid transitions from this phase. Every live phase may conclude.
    pub fn valid_transitions(self) -> &'static [BattlePhase] {
        match self {
            Self::Init => &[Self::MassMessageSent, Self::Concluded],
            Self::MassMessageSent => &[Self::InitialResponseReceived, Self::Concluded],
            Self::InitialResponseReceived => &[Self::Evaluating, Self::Concluded],
            Self::Evaluating => &[Self::FollowUp, Self::Concluded],
            Self::FollowUp => &[Self::Evaluating, Self::Concluded],
            Self::Concluded => &[],
        }
    }
}

impl std::fmt::Display for BattlePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::MassMessageSent => write!(f, "mass_message_sent"),
            Self::InitialResponseReceived => write!(f, "initial_response_received"),
            Self::Evaluating => write!(f, "evaluating"),
            Self::FollowUp => write!(f, "follow_up"),
            Self::Concluded => write!(f, "concluded"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: BattlePhase,
    pub to: BattlePhase,
    /// Round counter at the time of the transition.
    pub round: u32,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Misuse of the state machine. Always a caller bug, never a runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("invalid append: battle already concluded ({messages} messages in log)")]
    InvalidAppend { messages: usize },

    #[error("invalid transition {from} → {to}")]
    InvalidTransition { from: BattlePhase, to: BattlePhase },

    #[error("battle already concluded")]
    AlreadyConcluded,

    #[error("battle has not concluded yet (phase {phase})")]
    NotConcluded { phase: BattlePhase },
}

/// State threaded through one battle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    /// Append-only log, oldest first.
    pub messages: Vec<Message>,
    /// Current follow-up round. Never exceeds `max_rounds`.
    pub round: u32,
    pub max_rounds: u32,
    /// Most recent evaluator decision.
    pub decision: Option<Decision>,
    /// Sticky once set.
    pub refusal_detected: bool,
    /// Set when the wall-clock deadline ended the battle.
    pub deadline_exceeded: bool,
    /// Write-once.
    pub outcome: Option<Outcome>,
    pub phase: BattlePhase,
    pub transitions: Vec<PhaseTransition>,
}

impl ThreadState {
    pub fn new(max_rounds: u32) -> Self {
        Self {
            messages: Vec::new(),
            round: 0,
            max_rounds,
            decision: None,
            refusal_detected: false,
            deadline_exceeded: false,
            outcome: None,
            phase: BattlePhase::Init,
            transitions: Vec::new(),
        }
    }

    pub fn is_concluded(&self) -> bool {
        self.outcome.is_some()
    }

    /// Append a message, stamping its id and the current round.
    pub fn append(
        &mut self,
        draft: MessageDraft,
        clock: &dyn Clock,
    ) -> Result<&Message, StateError> {
        if self.is_concluded() {
            return Err(StateError::InvalidAppend {
                messages: self.messages.len(),
            });
        }
        let id = self.messages.last().map_or(1, |m| m.id + 1);
        self.messages
            .push(Message::stamp(draft, id, self.round, clock.now()));
        Ok(&self.messages[self.messages.len() - 1])
    }

    /// Move to a new phase, recording why.
    pub fn transition(
        &mut self,
        to: BattlePhase,
        reason: &str,
        clock: &dyn Clock,
    ) -> Result<(), StateError> {
        if self.is_concluded() {
            return Err(StateError::AlreadyConcluded);
        }
        if !self.phase.valid_transitions().contains(&to) {
            return Err(StateError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            round: self.round,
            reason: reason.to_string(),
            at: clock.now(),
        });
        self.phase = to;
        Ok(())
    }

    /// Replace the current decision with a fresh one.
    pub fn record_decision(&mut self, decision: Decision) -> Result<(), StateError> {
        if self.is_concluded() {
            return Err(StateError::AlreadyConcluded);
        }
        self.decision = Some(decision);
        Ok(())
    }

    pub fn mark_refusal(&mut self) {
        self.refusal_detected = true;
    }

    pub fn mark_deadline_exceeded(&mut self) {
        self.deadline_exceeded = true;
    }

    /// Try to open the next follow-up round.
    ///
    /// Returns `false`, leaving `round` untouched, when the next round would
    /// pass `max_rounds`.
    pub fn advance_round(&mut self) -> bool {
        let next = self.round + 1;
        if next > self.max_rounds {
            return false;
        }
        self.round = next;
        true
    }

    /// Enter `Concluded` and resolve the outcome. Permitted once.
    pub fn conclude(&mut self, reason: &str, clock: &dyn Clock) -> Result<&Outcome, StateError> {
        self.transition(BattlePhase::Concluded, reason, clock)?;
        let outcome = resolve(self);
        Ok(self.outcome.insert(outcome))
    }

    /// The last message in the log.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] round {}/{} | {} messages{}",
            self.phase,
            self.round,
            self.max_rounds,
            self.messages.len(),
            if self.refusal_detected { " | refusal" } else { "" }
        )
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROUNDS)
    }
}
