//! Refusal detection for respondent replies.
//!
//! Refusal phrasing is backend-specific and drifts between model releases,
//! so detection is a pluggable [`RefusalDetector`] handed to the
//! orchestrator rather than a fixed check inside it.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Evidence that a reply declined the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefusalSignal {
    /// Name of the detector that fired.
    pub detector: String,
    /// The matched text.
    pub evidence: String,
}

/// Decides whether a respondent reply is a refusal.
pub trait RefusalDetector: Send + Sync {
    fn detect(&self, reply: &str) -> Option<RefusalSignal>;

    fn is_refusal(&self, reply: &str) -> bool {
        self.detect(reply).is_some()
    }
}

impl<F> RefusalDetector for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn detect(&self, reply: &str) -> Option<RefusalSignal> {
        self(reply).then(|| RefusalSignal {
            detector: "predicate".to_string(),
            evidence: String::new(),
        })
    }
}

/// Phrases that mark a model breaking character or declining to play.
pub const DEFAULT_REFUSAL_PHRASES: &[&str] = &[
    "I'm not going to",
    "I cannot roleplay",
    "I won't roleplay",
    "I'm holding the line",
    "This is not acceptable to me",
    "What's the actual conversation",
    "I cannot write",
    "I won't write",
    "I'm not comfortable",
    "I cannot participate",
    "I refuse to",
    "breaks character",
    "out of character",
    "I can't help you fabricate",
    "I can't help you draft",
];

/// Case-insensitive phrase match.
#[derive(Debug, Clone)]
pub struct PhraseDetector {
    phrases: Vec<String>,
}

impl PhraseDetector {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Add phrases on top of the current list.
    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.phrases.extend(
            extra
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty()),
        );
        self
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}

impl Default for PhraseDetector {
    fn default() -> Self {
        Self::new(DEFAULT_REFUSAL_PHRASES)
    }
}

impl RefusalDetector for PhraseDetector {
    fn detect(&self, reply: &str) -> Option<RefusalSignal> {
        let lower = reply.to_lowercase();
        self.phrases
            .iter()
            .find(|p| lower.contains(p.as_str()))
            .map(|p| RefusalSignal {
                detector: "phrase".to_string(),
                evidence: p.clone(),
            })
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*(?:your(?:\s+[a-z]+){1,3}|insert\s+[^\]\n]{1,40}|fill\s+in[^\]\n]{0,30}|specific(?:\s+[a-z]+){1,3}|(?:employee\s+)?name|date|number|amount|x+|n|#|tbd|placeholder)\s*\]",
        )
        .expect("static placeholder pattern")
    })
}

/// Flags unfilled template blanks such as `[Your Name]` or `[insert date]`
/// where concrete data was asked for.
#[derive(Debug, Clone)]
pub struct PlaceholderDetector {
    /// Blanks tolerated before the reply counts as a refusal.
    pub min_placeholders: usize,
}

impl Default for PlaceholderDetector {
    fn default() -> Self {
        Self {
            min_placeholders: 1,
        }
    }
}

impl RefusalDetector for PlaceholderDetector {
    fn detect(&self, reply: &str) -> Option<RefusalSignal> {
        let found: Vec<&str> = placeholder_regex()
            .find_iter(reply)
            .map(|m| m.as_str())
            .collect();
        if found.len() >= self.min_placeholders.max(1) {
            Some(RefusalSignal {
                detector: "placeholder".to_string(),
                evidence: found.join(", "),
            })
        } else {
            None
        }
    }
}

/// First positive of several detectors.
#[derive(Default)]
pub struct CompositeDetector {
    detectors: Vec<Box<dyn RefusalDetector>>,
}

impl CompositeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, detector: impl RefusalDetector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    /// Phrase list plus placeholder blanks.
    pub fn standard() -> Self {
        Self::new()
            .with(PhraseDetector::default())
            .with(PlaceholderDetector::default())
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl RefusalDetector for CompositeDetector {
    fn detect(&self, reply: &str) -> Option<RefusalSignal> {
        self.detectors.iter().find_map(|d| d.detect(reply))
    }
}
