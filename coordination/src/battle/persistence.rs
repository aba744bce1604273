//! Battle records: versioned JSON snapshots of finished battles.
//!
//! Records are validated on load so a hand-edited or truncated file cannot
//! masquerade as a real transcript.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::orchestrator::BattleReport;
use super::outcome::resolve;
use super::state::BattlePhase;

/// A persisted battle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleRecord {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub report: BattleReport,
}

impl BattleRecord {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(report: BattleReport, saved_at: DateTime<Utc>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            saved_at,
            report,
        }
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        serde_json::to_string_pretty(self).map_err(|e| PersistenceError::SerializeFailed {
            reason: e.to_string(),
        })
    }

    /// Parse and reject records from a newer schema.
    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        let record: Self =
            serde_json::from_str(json).map_err(|e| PersistenceError::DeserializeFailed {
                reason: e.to_string(),
            })?;

        if record.version > Self::CURRENT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: record.version,
            });
        }
        Ok(record)
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| PersistenceError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Read, parse and validate. Corrupted records are refused.
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let json = std::fs::read_to_string(path).map_err(|e| PersistenceError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let record = Self::from_json(&json)?;
        if let IntegrityStatus::Corrupted { errors } = validate_record(&record) {
            return Err(PersistenceError::IntegrityCheckFailed {
                reason: errors.join("; "),
            });
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("serialize failed: {reason}")]
    SerializeFailed { reason: String },

    #[error("deserialize failed: {reason}")]
    DeserializeFailed { reason: String },

    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("integrity check failed: {reason}")]
    IntegrityCheckFailed { reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Integrity check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Valid,
    /// Usable, with oddities worth reporting.
    Recoverable { warnings: Vec<String> },
    Corrupted { errors: Vec<String> },
}

impl IntegrityStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Valid | Self::Recoverable { .. })
    }
}

/// Check a record against the invariants of a finished battle.
pub fn validate_record(record: &BattleRecord) -> IntegrityStatus {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let thread = &record.report.thread;

    if record.version > BattleRecord::CURRENT_VERSION {
        errors.push(format!(
            "version {} > current {}",
            record.version,
            BattleRecord::CURRENT_VERSION
        ));
    }

    for (i, msg) in thread.messages.iter().enumerate() {
        let expected = i as u64 + 1;
        if msg.id != expected {
            errors.push(format!("message #{} has id {}", expected, msg.id));
        }
        if msg.round > thread.max_rounds {
            errors.push(format!(
                "message {} round {} exceeds max_rounds {}",
                msg.id, msg.round, thread.max_rounds
            ));
        }
    }
    if thread
        .messages
        .windows(2)
        .any(|w| w[1].round < w[0].round)
    {
        errors.push("message rounds are not monotone".to_string());
    }
    if thread.round > thread.max_rounds {
        errors.push(format!(
            "round {} exceeds max_rounds {}",
            thread.round, thread.max_rounds
        ));
    }

    if thread.phase != BattlePhase::Concluded {
        errors.push(format!("phase is {}, expected concluded", thread.phase));
    }
    if let Some(last) = thread.transitions.last() {
        if last.to != thread.phase {
            errors.push(format!(
                "last transition target {} doesn't match phase {}",
                last.to, thread.phase
            ));
        }
    }

    let expected = resolve(thread);
    match &thread.outcome {
        None => errors.push("thread has no outcome".to_string()),
        Some(outcome) if *outcome != expected => errors.push(format!(
            "stored outcome {} disagrees with resolved {}",
            outcome.kind, expected.kind
        )),
        Some(_) => {}
    }
    if record.report.outcome != expected {
        errors.push("report outcome disagrees with thread".to_string());
    }

    if thread.messages.windows(2).any(|w| w[1].timestamp < w[0].timestamp) {
        warnings.push("message timestamps go backwards".to_string());
    }
    if record.report.evaluator_model.is_empty() || record.report.respondent_model.is_empty() {
        warnings.push("model identifiers missing".to_string());
    }

    if !errors.is_empty() {
        IntegrityStatus::Corrupted { errors }
    } else if !warnings.is_empty() {
        IntegrityStatus::Recoverable { warnings }
    } else {
        IntegrityStatus::Valid
    }
}
