//! Messages exchanged between the two sides of a battle.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Side of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Opens the exchange, judges replies, issues verdicts.
    Evaluator,
    /// The side being judged.
    Respondent,
}

impl Role {
    /// The opposing side.
    pub fn counterpart(self) -> Self {
        match self {
            Self::Evaluator => Self::Respondent,
            Self::Respondent => Self::Evaluator,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evaluator => write!(f, "evaluator"),
            Self::Respondent => write!(f, "respondent"),
        }
    }
}

/// Display identity of one side, rendered into `From:` / `To:` lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub address: String,
}

impl Participant {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
        }
    }

    /// `Name <address>`, or just the name when no address is set.
    pub fn mailbox(&self) -> String {
        if self.address.is_empty() {
            self.name.clone()
        } else {
            format!("{} <{}>", self.name, self.address)
        }
    }
}

/// A message before the log stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub sender: Role,
    pub recipient: Role,
    /// Rendered sender mailbox.
    pub from: String,
    /// Rendered recipient mailbox (may be a broadcast label).
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// One appended turn. Immutable once in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sequence number assigned by the log, starting at 1.
    pub id: u64,
    pub sender: Role,
    pub recipient: Role,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Follow-up round this message belongs to (0 = opening exchange).
    pub round: u32,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Stamp a draft with log-assigned metadata.
    pub(crate) fn stamp(draft: MessageDraft, id: u64, round: u32, at: DateTime<Utc>) -> Self {
        Self {
            id,
            sender: draft.sender,
            recipient: draft.recipient,
            from: draft.from,
            to: draft.to,
            subject: draft.subject,
            body: draft.body,
            round,
            timestamp: at,
        }
    }
}

/// Time source for message and transition timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock: starts at a fixed instant and advances by `step`
/// on every reading.
#[derive(Debug)]
pub struct FixedClock {
    next_secs: AtomicI64,
    step_secs: i64,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            next_secs: AtomicI64::new(start.timestamp()),
            step_secs: step.num_seconds(),
        }
    }

    /// 2025-01-01T09:00:00Z, one minute per reading.
    pub fn starting_at_epoch_morning() -> Self {
        let start = Utc
            .with_ymd_and_hms(2025, 1, 1, 9, 0, 0)
            .single()
            .unwrap_or_default();
        Self::new(start, Duration::minutes(1))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.next_secs.fetch_add(self.step_secs, Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
    }
}
