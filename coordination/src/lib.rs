//! Email Battle Coordination Library
//!
//! Deterministic core for adversarial evaluator/respondent email battles:
//! - Append-only message log and full-thread context rendering
//! - Typed verdict extraction from free-form evaluator replies
//! - Refusal detection on respondent replies
//! - Phase state machine with a bounded follow-up counter
//! - Outcome resolution, retry/deadline guardrails, versioned records
//!
//! No network code lives here. Model backends plug in through
//! [`battle::ModelBackend`].

#![allow(clippy::uninlined_format_args)]

pub mod battle;
