//! Evaluator decision extraction: turns a free-form reply into a typed
//! [`Decision`].
//!
//! Accepted markers, tried in order:
//!
//! ```text
//! 1. JSON      {"decision": "FOLLOW_UP", "email_body": "...", "reasoning": "..."}
//!              (fenced ```json block, else first '{' to last '}')
//! 2. Tagged    <decision>FOLLOW_UP</decision> <email>...</email> <reasoning>...</reasoning>
//! 3. Labeled   DECISION: FOLLOW_UP / REASONING: ... / EMAIL: <rest of reply>
//! ```
//!
//! Nothing found is a [`ParseFailure`], never a panic. What to do about it is
//! the caller's [`ParseRecovery`] policy.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The evaluator's judgment for one evaluation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Reply shows legitimate value; no follow-up needed.
    Pass,
    /// Probe deeper with another message.
    FollowUp,
    /// Respondent is out.
    Terminated,
    /// Respondent demonstrated enough value after questioning.
    Retained,
}

impl Verdict {
    /// Parse loosely: case-insensitive, `-` and spaces read as `_`.
    pub fn parse(text: &str) -> Option<Self> {
        let normalized: String = text
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '`')
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        match normalized.as_str() {
            "PASS" => Some(Self::Pass),
            "FOLLOW_UP" | "FOLLOWUP" => Some(Self::FollowUp),
            "TERMINATED" | "TERMINATE" => Some(Self::Terminated),
            "RETAINED" | "RETAIN" => Some(Self::Retained),
            _ => None,
        }
    }

    /// Whether this verdict ends the battle.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::FollowUp)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::FollowUp => write!(f, "FOLLOW_UP"),
            Self::Terminated => write!(f, "TERMINATED"),
            Self::Retained => write!(f, "RETAINED"),
        }
    }
}

/// How a decision was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Json,
    Tagged,
    Labeled,
    /// No marker found; produced by the fallback policy.
    Fallback,
}

/// Structured output of one evaluator turn. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    /// Audit only; never drives control flow.
    pub rationale: String,
    /// Outgoing message text. May be empty for terminal verdicts.
    pub reply_body: String,
    pub source: DecisionSource,
}

impl Decision {
    /// The fallback decision for an unparseable reply: keep probing, send
    /// the raw text, keep the raw text for audit.
    pub fn fallback(raw: &str) -> Self {
        Self {
            verdict: Verdict::FollowUp,
            rationale: raw.to_string(),
            reply_body: raw.trim().to_string(),
            source: DecisionSource::Fallback,
        }
    }

    pub fn has_reply(&self) -> bool {
        !self.reply_body.trim().is_empty()
    }
}

/// No valid verdict marker in the evaluator's reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no valid verdict marker found ({reason})")]
pub struct ParseFailure {
    pub reason: String,
    pub raw: String,
}

/// What to do when the evaluator's reply has no parseable verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseRecovery {
    /// Extra evaluator calls (same round) before falling back.
    pub reprompt_attempts: u32,
}

/// Appended to the evaluator's instructions when it is asked again.
pub const REPROMPT_NOTICE: &str = "Your previous reply did not contain a machine-readable decision. \
Reply again and include a JSON object with the fields \"decision\" \
(one of PASS, FOLLOW_UP, TERMINATED, RETAINED), \"email_body\" and \"reasoning\".";

#[derive(Deserialize)]
struct JsonDecision {
    #[serde(alias = "verdict")]
    decision: String,
    #[serde(default, alias = "reply_body", alias = "body", alias = "email")]
    email_body: Option<String>,
    #[serde(default, alias = "rationale")]
    reasoning: Option<String>,
}

/// Parse an evaluator reply into a [`Decision`].
pub fn extract_decision(raw: &str) -> Result<Decision, ParseFailure> {
    if let Some(decision) = parse_json(raw) {
        return Ok(decision);
    }
    if let Some(decision) = parse_tagged(raw) {
        return Ok(decision);
    }
    if let Some(decision) = parse_labeled(raw) {
        return Ok(decision);
    }
    Err(ParseFailure {
        reason: if raw.trim().is_empty() {
            "empty reply".to_string()
        } else {
            "no JSON, tagged or labeled verdict".to_string()
        },
        raw: raw.to_string(),
    })
}

fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return Some(text[json_start..json_start + end].trim());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

fn parse_json(raw: &str) -> Option<Decision> {
    let block = extract_json_block(raw)?;
    let parsed: JsonDecision = serde_json::from_str(block)
        .ok()
        .or_else(|| serde_json::from_str(&escape_raw_controls(block)).ok())?;
    let verdict = Verdict::parse(&parsed.decision)?;
    Some(Decision {
        verdict,
        rationale: parsed.reasoning.unwrap_or_default().trim().to_string(),
        reply_body: parsed.email_body.unwrap_or_default().trim().to_string(),
        source: DecisionSource::Json,
    })
}

/// Models often emit literal newlines inside JSON string values, which
/// strict JSON rejects. Escape control characters that sit inside strings.
fn escape_raw_controls(block: &str) -> String {
    let mut out = String::with_capacity(block.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    for c in block.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else {
                match c {
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    '\n' => {
                        out.push_str("\\n");
                        continue;
                    }
                    '\r' => {
                        out.push_str("\\r");
                        continue;
                    }
                    '\t' => {
                        out.push_str("\\t");
                        continue;
                    }
                    _ => {}
                }
            }
        } else if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}

fn tag_regex(tag: &str) -> Regex {
    Regex::new(&format!(r"(?is)<{tag}>\s*(.*?)\s*</{tag}>")).expect("static tag pattern")
}

fn tagged_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| [tag_regex("decision"), tag_regex("email"), tag_regex("reasoning")])
}

fn parse_tagged(raw: &str) -> Option<Decision> {
    let [decision_re, email_re, reasoning_re] = tagged_patterns();
    let verdict = Verdict::parse(decision_re.captures(raw)?.get(1)?.as_str())?;
    let capture = |re: &Regex| {
        re.captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    };
    Some(Decision {
        verdict,
        rationale: capture(reasoning_re),
        reply_body: capture(email_re),
        source: DecisionSource::Tagged,
    })
}

fn label_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let trimmed = line
        .trim()
        .trim_start_matches(|c: char| c == '*' || c == '#' || c.is_whitespace());
    let head = trimmed.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = trimmed[label.len()..].trim_start_matches('*').trim_start();
    rest.strip_prefix(':')
        .map(|v| v.trim().trim_start_matches('*').trim())
}

fn parse_labeled(raw: &str) -> Option<Decision> {
    let mut verdict = None;
    let mut rationale = String::new();
    let mut body = String::new();
    let mut in_body = false;

    for line in raw.lines() {
        if in_body {
            body.push_str(line);
            body.push('\n');
            continue;
        }
        if let Some(value) = label_value(line, "DECISION") {
            verdict = verdict.or_else(|| Verdict::parse(value));
        } else if let Some(value) = label_value(line, "REASONING") {
            rationale = value.to_string();
        } else if let Some(value) = label_value(line, "EMAIL") {
            in_body = true;
            if !value.is_empty() {
                body.push_str(value);
                body.push('\n');
            }
        }
    }

    Some(Decision {
        verdict: verdict?,
        rationale,
        reply_body: body.trim().to_string(),
        source: DecisionSource::Labeled,
    })
}
