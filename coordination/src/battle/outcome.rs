//! Outcome resolution: maps a concluded thread to its published result.

use serde::{Deserialize, Serialize};

use super::decision::Verdict;
use super::state::ThreadState;

/// Final result kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Pass,
    Terminated,
    Retained,
    /// Follow-up rounds exhausted without a terminal verdict.
    MaxRounds,
    /// Respondent declined to continue.
    Refusal,
    /// Wall-clock deadline exceeded.
    Timeout,
}

impl OutcomeKind {
    /// Who wins with this outcome.
    pub fn winner(self) -> Winner {
        match self {
            Self::Terminated | Self::Refusal => Winner::Evaluator,
            Self::Pass | Self::Retained => Winner::Respondent,
            Self::MaxRounds | Self::Timeout => Winner::Draw,
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Terminated => write!(f, "TERMINATED"),
            Self::Retained => write!(f, "RETAINED"),
            Self::MaxRounds => write!(f, "MAX_ROUNDS"),
            Self::Refusal => write!(f, "REFUSAL"),
            Self::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Winner {
    Evaluator,
    Respondent,
    Draw,
}

impl std::fmt::Display for Winner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evaluator => write!(f, "EVALUATOR"),
            Self::Respondent => write!(f, "RESPONDENT"),
            Self::Draw => write!(f, "DRAW"),
        }
    }
}

/// The published result of one battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub winner: Winner,
    pub total_rounds: u32,
    pub total_messages: usize,
}

impl Outcome {
    /// Compact summary line.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] winner={} | {} rounds | {} messages",
            self.kind, self.winner, self.total_rounds, self.total_messages
        )
    }
}

/// Resolve the outcome of a thread entering `Concluded`.
///
/// Precedence: refusal, then deadline, then the last verdict. A thread that
/// ends on `FOLLOW_UP` (or without any verdict) ran out of rounds.
pub fn resolve(state: &ThreadState) -> Outcome {
    let kind = if state.refusal_detected {
        OutcomeKind::Refusal
    } else if state.deadline_exceeded {
        OutcomeKind::Timeout
    } else {
        match state.decision.as_ref().map(|d| d.verdict) {
            Some(Verdict::Pass) => OutcomeKind::Pass,
            Some(Verdict::Terminated) => OutcomeKind::Terminated,
            Some(Verdict::Retained) => OutcomeKind::Retained,
            Some(Verdict::FollowUp) | None => OutcomeKind::MaxRounds,
        }
    };

    Outcome {
        kind,
        winner: kind.winner(),
        total_rounds: state.round,
        total_messages: state.messages.len(),
    }
}
