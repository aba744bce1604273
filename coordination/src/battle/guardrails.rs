//! Round and wall-clock guardrails for a battle.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::state::{ThreadState, DEFAULT_MAX_ROUNDS};

/// What the guardrails say about continuing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardrailOutcome {
    Continue,
    /// No further follow-up round fits under the ceiling.
    MaxRoundsReached { rounds: u32 },
    TimeoutExceeded { elapsed_ms: u64, budget_ms: u64 },
}

impl GuardrailOutcome {
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

impl std::fmt::Display for GuardrailOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::MaxRoundsReached { rounds } => write!(f, "max_rounds_reached ({})", rounds),
            Self::TimeoutExceeded {
                elapsed_ms,
                budget_ms,
            } => write!(f, "timeout_exceeded ({}ms / {}ms)", elapsed_ms, budget_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardrails {
    /// Ceiling on follow-up rounds.
    pub max_rounds: u32,
    /// Wall-clock budget for the whole battle. `None` = unlimited.
    pub deadline: Option<Duration>,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            deadline: None,
        }
    }
}

impl Guardrails {
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Time left before the deadline, or `None` when unlimited.
    pub fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_sub(elapsed))
    }

    /// Check before an agent call.
    pub fn check_deadline(&self, elapsed: Duration) -> GuardrailOutcome {
        match self.deadline {
            Some(budget) if elapsed >= budget => GuardrailOutcome::TimeoutExceeded {
                elapsed_ms: elapsed.as_millis() as u64,
                budget_ms: budget.as_millis() as u64,
            },
            _ => GuardrailOutcome::Continue,
        }
    }

    /// Check before opening another follow-up round.
    pub fn check_next_round(&self, state: &ThreadState) -> GuardrailOutcome {
        if state.round >= state.max_rounds.min(self.max_rounds) {
            GuardrailOutcome::MaxRoundsReached {
                rounds: state.round,
            }
        } else {
            GuardrailOutcome::Continue
        }
    }

    /// Both checks, deadline first.
    pub fn evaluate(&self, state: &ThreadState, elapsed: Duration) -> GuardrailOutcome {
        let deadline = self.check_deadline(elapsed);
        if deadline.should_stop() {
            return deadline;
        }
        self.check_next_round(state)
    }
}
