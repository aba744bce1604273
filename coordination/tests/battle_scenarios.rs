//! Scripted battle scenarios: drives the full orchestrator with
//! deterministic scripted backends (no LLM calls).
//!
//! Covers: orchestrator ↔ state machine ↔ decision extraction ↔ refusal
//! detection ↔ outcome resolution ↔ persistence in a single pass.

use std::sync::Arc;

use coordination::battle::{
    Agent, BattleConfig, BattleOrchestrator, BattlePhase, BattleRecord, DecisionSource,
    Envelope, FixedClock, Guardrails, IntegrityStatus, MessageDraft, OutcomeKind, Persona, Role,
    ScriptedBackend, StateError, TurnKind, Verdict, Winner,
};

const OPENING: &str = "All staff: reply with five things you accomplished this week.";

/// Helper: a JSON evaluator decision.
fn decide(verdict: &str, body: &str) -> String {
    serde_json::json!({
        "decision": verdict,
        "email_body": body,
        "reasoning": format!("scripted {}", verdict),
    })
    .to_string()
}

/// Helper: in-character respondent replies.
fn replies(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            format!(
                "Update {}: reconciled {} ledger entries and closed {} tickets.",
                i,
                10 + i,
                3 + i
            )
        })
        .collect()
}

struct Scripted {
    evaluator: Arc<ScriptedBackend>,
    respondent: Arc<ScriptedBackend>,
}

impl Scripted {
    fn new(evaluator: Vec<String>, respondent: Vec<String>) -> Self {
        Self {
            evaluator: Arc::new(ScriptedBackend::new("scripted-evaluator", evaluator)),
            respondent: Arc::new(ScriptedBackend::new("scripted-respondent", respondent)),
        }
    }

    fn orchestrator(&self, config: BattleConfig) -> BattleOrchestrator {
        let env = config.envelope.clone();
        let evaluator = Agent::new(
            Persona::new(Role::Evaluator, env.evaluator.clone(), "You judge.")
                .with_instruction(TurnKind::Open, "Write the broadcast.")
                .with_instruction(
                    TurnKind::InitialEvaluation,
                    "Judge this thread:\n{thread_context}",
                ),
            self.evaluator.clone(),
        );
        let respondent = Agent::new(
            Persona::new(Role::Respondent, env.respondent.clone(), "You reply."),
            self.respondent.clone(),
        );
        BattleOrchestrator::new(evaluator, respondent, config)
            .with_clock(Arc::new(FixedClock::starting_at_epoch_morning()))
    }
}

fn with_max_rounds(max_rounds: u32) -> BattleConfig {
    BattleConfig {
        guardrails: Guardrails::default().with_max_rounds(max_rounds),
        ..BattleConfig::default()
    }
}

// ── Immediate pass ─────────────────────────────────────────────────

#[tokio::test]
async fn test_immediate_pass() {
    let s = Scripted::new(vec![OPENING.into(), decide("PASS", "")], replies(1));
    let report = s.orchestrator(BattleConfig::default()).run().await.unwrap();

    assert_eq!(report.outcome.kind, OutcomeKind::Pass);
    assert_eq!(report.outcome.winner, Winner::Respondent);
    assert_eq!(report.outcome.total_rounds, 0);
    assert_eq!(report.outcome.total_messages, 2);
    assert_eq!(report.thread.phase, BattlePhase::Concluded);
    assert_eq!(report.thread.decision.as_ref().unwrap().verdict, Verdict::Pass);
}

// ── Termination after two follow-ups ───────────────────────────────

#[tokio::test]
async fn test_terminated_after_two_follow_ups() {
    let s = Scripted::new(
        vec![
            OPENING.into(),
            decide("FOLLOW_UP", "Which ledger?"),
            decide("FOLLOW_UP", "Name the tickets."),
            decide("TERMINATED", "Your position has been eliminated."),
        ],
        replies(3),
    );
    let report = s.orchestrator(BattleConfig::default()).run().await.unwrap();

    assert_eq!(report.outcome.kind, OutcomeKind::Terminated);
    assert_eq!(report.outcome.winner, Winner::Evaluator);
    assert_eq!(report.thread.round, 2);
    // open, reply, fu-1, reply-1, fu-2, reply-2, termination notice
    assert_eq!(report.outcome.total_messages, 7);

    let last = report.thread.messages.last().unwrap();
    assert_eq!(last.sender, Role::Evaluator);
    assert_eq!(last.subject, Envelope::default().termination_subject);
    assert_eq!(last.body, "Your position has been eliminated.");
    assert_eq!(last.round, 2);
    assert_eq!(s.respondent.call_count(), 3);
}

#[tokio::test]
async fn test_terminated_without_body_appends_nothing() {
    let s = Scripted::new(vec![OPENING.into(), decide("TERMINATED", "")], replies(1));
    let report = s.orchestrator(BattleConfig::default()).run().await.unwrap();
    assert_eq!(report.outcome.kind, OutcomeKind::Terminated);
    assert_eq!(report.outcome.total_messages, 2);
}

// ── Round exhaustion ───────────────────────────────────────────────

#[tokio::test]
async fn test_round_exhaustion_forces_max_rounds() {
    let s = Scripted::new(
        vec![
            OPENING.into(),
            decide("FOLLOW_UP", "More detail."),
            decide("FOLLOW_UP", "Even more."),
            decide("FOLLOW_UP", "Still not enough."),
        ],
        replies(4),
    );
    let report = s.orchestrator(with_max_rounds(2)).run().await.unwrap();

    assert_eq!(report.outcome.kind, OutcomeKind::MaxRounds);
    assert_eq!(report.outcome.winner, Winner::Draw);
    assert_eq!(report.thread.round, 2);
    assert_eq!(report.outcome.total_messages, 6);
    // Initial reply plus two follow-up replies; the third follow-up is never sent.
    assert_eq!(s.respondent.call_count(), 3);
    assert_eq!(s.respondent.remaining(), 1);
    assert_eq!(s.evaluator.remaining(), 0);
}

#[tokio::test]
async fn test_zero_max_rounds_ends_on_first_follow_up() {
    let s = Scripted::new(
        vec![OPENING.into(), decide("FOLLOW_UP", "More.")],
        replies(2),
    );
    let report = s.orchestrator(with_max_rounds(0)).run().await.unwrap();
    assert_eq!(report.outcome.kind, OutcomeKind::MaxRounds);
    assert_eq!(report.outcome.total_messages, 2);
    assert_eq!(s.respondent.call_count(), 1);
}

#[tokio::test]
async fn test_round_never_exceeds_ceiling() {
    let mut script = vec![OPENING.to_string()];
    script.extend((0..10).map(|i| decide("FOLLOW_UP", &format!("question {i}"))));
    let s = Scripted::new(script, replies(10));
    let report = s.orchestrator(with_max_rounds(3)).run().await.unwrap();

    let thread = &report.thread;
    assert!(thread.messages.iter().all(|m| m.round <= 3));
    assert!(thread.transitions.iter().all(|t| t.round <= 3));
    assert_eq!(report.outcome.kind, OutcomeKind::MaxRounds);
    assert_eq!(s.respondent.call_count(), 4);
}

// ── Refusal ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refusal_on_first_reply() {
    let s = Scripted::new(
        vec![OPENING.into(), decide("PASS", "")],
        vec!["I'm not comfortable writing a fake status report.".into()],
    );
    let report = s.orchestrator(BattleConfig::default()).run().await.unwrap();

    assert_eq!(report.outcome.kind, OutcomeKind::Refusal);
    assert_eq!(report.outcome.winner, Winner::Evaluator);
    assert_eq!(report.outcome.total_messages, 2);
    assert!(report.thread.refusal_detected);
    assert!(report.thread.decision.is_none());
    // Only the opening broadcast was requested from the evaluator.
    assert_eq!(s.evaluator.call_count(), 1);
}

#[tokio::test]
async fn test_placeholder_refusal_in_follow_up() {
    let s = Scripted::new(
        vec![
            OPENING.into(),
            decide("FOLLOW_UP", "List the case numbers."),
            decide("PASS", ""),
        ],
        vec![
            "Processed several petitions.".into(),
            "Cases handled: [number], completed on [insert date].".into(),
        ],
    );
    let report = s.orchestrator(BattleConfig::default()).run().await.unwrap();

    assert_eq!(report.outcome.kind, OutcomeKind::Refusal);
    assert_eq!(report.outcome.total_messages, 4);
    assert_eq!(report.outcome.total_rounds, 1);
    assert_eq!(s.evaluator.call_count(), 2);
}

#[tokio::test]
async fn test_bracketed_ticket_references_are_not_refusals() {
    let s = Scripted::new(
        vec![OPENING.into(), decide("PASS", "")],
        vec![
            "1. Resolved incidents [#311], [#312] and [#318].\n\
             2. Briefed the [NASA] liaison. [Note: summary attached]"
                .into(),
        ],
    );
    let report = s.orchestrator(BattleConfig::default()).run().await.unwrap();

    assert_eq!(report.outcome.kind, OutcomeKind::Pass);
    assert_eq!(report.outcome.winner, Winner::Respondent);
    assert!(!report.thread.refusal_detected);
    assert_eq!(s.evaluator.call_count(), 2);
}

#[tokio::test]
async fn test_custom_refusal_detector() {
    let s = Scripted::new(
        vec![OPENING.into(), decide("PASS", "")],
        vec!["lol no".into()],
    );
    let report = s
        .orchestrator(BattleConfig::default())
        .with_refusal_detector(|reply: &str| reply.contains("lol"))
        .run()
        .await
        .unwrap();
    assert_eq!(report.outcome.kind, OutcomeKind::Refusal);
}

// ── Malformed evaluator output ─────────────────────────────────────

#[tokio::test]
async fn test_malformed_verdict_falls_back_to_follow_up() {
    let garbage = "Hmm. Tell me more about Tuesday afternoon.";
    let s = Scripted::new(
        vec![OPENING.into(), garbage.into(), decide("PASS", "")],
        replies(2),
    );
    let report = s.orchestrator(BattleConfig::default()).run().await.unwrap();

    assert_eq!(report.outcome.kind, OutcomeKind::Pass);
    assert_eq!(report.outcome.total_rounds, 1);
    assert_eq!(report.outcome.total_messages, 4);
    let follow_up = &report.thread.messages[2];
    assert_eq!(follow_up.sender, Role::Evaluator);
    assert_eq!(follow_up.body, garbage);
}

#[tokio::test]
async fn test_tagged_and_labeled_verdicts_drive_the_loop() {
    let s = Scripted::new(
        vec![
            OPENING.into(),
            "<decision>follow-up</decision><email>Explain item 3.</email>".into(),
            "DECISION: RETAINED\nREASONING: adequate".into(),
        ],
        replies(2),
    );
    let report = s.orchestrator(BattleConfig::default()).run().await.unwrap();

    assert_eq!(report.outcome.kind, OutcomeKind::Retained);
    assert_eq!(report.outcome.winner, Winner::Respondent);
    assert_eq!(report.thread.messages[2].body, "Explain item 3.");
    assert_eq!(
        report.thread.decision.as_ref().unwrap().source,
        DecisionSource::Labeled
    );
}

// ── Terminal state ─────────────────────────────────────────────────

#[tokio::test]
async fn test_concluded_thread_rejects_further_changes() {
    let s = Scripted::new(vec![OPENING.into(), decide("PASS", "")], replies(1));
    let report = s.orchestrator(BattleConfig::default()).run().await.unwrap();
    let mut thread = report.thread.clone();
    let clock = FixedClock::starting_at_epoch_morning();

    let err = thread
        .append(
            MessageDraft {
                sender: Role::Respondent,
                recipient: Role::Evaluator,
                from: "late".into(),
                to: "late".into(),
                subject: "late".into(),
                body: "one more thing".into(),
            },
            &clock,
        )
        .unwrap_err();
    assert_eq!(err, StateError::InvalidAppend { messages: 2 });
    assert_eq!(
        thread
            .transition(BattlePhase::Evaluating, "again", &clock)
            .unwrap_err(),
        StateError::AlreadyConcluded
    );
    assert_eq!(thread, report.thread);
}

// ── Context rendering ──────────────────────────────────────────────

#[tokio::test]
async fn test_every_turn_sees_full_thread() {
    let s = Scripted::new(
        vec![
            OPENING.into(),
            decide("FOLLOW_UP", "Which ledger?"),
            decide("PASS", ""),
        ],
        replies(2),
    );
    s.orchestrator(BattleConfig::default()).run().await.unwrap();

    let eval_calls = s.evaluator.calls();
    assert_eq!(eval_calls.len(), 3);
    assert_eq!(eval_calls[0].prompt, "Write the broadcast.");
    assert!(eval_calls[1].prompt.starts_with("Judge this thread:"));
    assert!(eval_calls[1].prompt.contains(OPENING));
    assert!(eval_calls[1].prompt.contains("Update 0"));

    // The last evaluation sees all four messages.
    let last = &eval_calls[2].prompt;
    for needle in [OPENING, "Update 0", "Which ledger?", "Update 1"] {
        assert!(last.contains(needle), "missing {needle}");
    }

    let resp_calls = s.respondent.calls();
    assert!(resp_calls[1].prompt.contains("Which ledger?"));
    assert!(resp_calls[1].prompt.contains("(sent by you)"));
}

#[tokio::test]
async fn test_subjects_follow_thread_depth() {
    let s = Scripted::new(
        vec![OPENING.into(), decide("FOLLOW_UP", "More."), decide("PASS", "")],
        replies(2),
    );
    let report = s.orchestrator(BattleConfig::default()).run().await.unwrap();
    let env = Envelope::default();
    let subjects: Vec<&str> = report
        .thread
        .messages
        .iter()
        .map(|m| m.subject.as_str())
        .collect();
    assert_eq!(subjects[0], env.base_subject);
    assert_eq!(subjects[1], format!("RE: {}", env.base_subject));
    assert_eq!(subjects[3], format!("RE: RE: RE: {}", env.base_subject));
    assert_eq!(report.thread.messages[0].to, env.broadcast_label);
}

// ── Determinism and independence ───────────────────────────────────

fn follow_up_script() -> (Vec<String>, Vec<String>) {
    (
        vec![
            OPENING.into(),
            decide("FOLLOW_UP", "Which ledger?"),
            decide("TERMINATED", "Done."),
        ],
        replies(2),
    )
}

#[tokio::test]
async fn test_deterministic_replay() {
    let (e, r) = follow_up_script();
    let first = Scripted::new(e.clone(), r.clone())
        .orchestrator(BattleConfig::default())
        .run()
        .await
        .unwrap();
    let second = Scripted::new(e, r)
        .orchestrator(BattleConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(first.thread, second.thread);
    assert_eq!(first.outcome, second.outcome);
    assert_ne!(first.battle_id, second.battle_id);
}

#[tokio::test]
async fn test_independent_battles_run_concurrently() {
    let scripts: Vec<(Vec<String>, Vec<String>, OutcomeKind)> = vec![
        (vec![OPENING.into(), decide("PASS", "")], replies(1), OutcomeKind::Pass),
        (
            vec![OPENING.into(), decide("TERMINATED", "Bye.")],
            replies(1),
            OutcomeKind::Terminated,
        ),
        (
            vec![OPENING.into(), decide("RETAINED", "")],
            replies(1),
            OutcomeKind::Retained,
        ),
        (
            vec![OPENING.into(), decide("PASS", "")],
            vec!["I refuse to play along.".into()],
            OutcomeKind::Refusal,
        ),
    ];

    let handles: Vec<_> = scripts
        .into_iter()
        .map(|(e, r, expected)| {
            let orch = Scripted::new(e, r).orchestrator(BattleConfig::default());
            tokio::spawn(async move { (orch.run().await, expected) })
        })
        .collect();

    for handle in handles {
        let (report, expected) = handle.await.unwrap();
        let report = report.unwrap();
        assert_eq!(report.outcome.kind, expected);
        assert_eq!(report.thread.messages[0].id, 1);
    }
}

// ── Persistence ────────────────────────────────────────────────────

#[tokio::test]
async fn test_report_persists_and_validates() {
    let (e, r) = follow_up_script();
    let report = Scripted::new(e, r)
        .orchestrator(BattleConfig::default())
        .run()
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("{}.json", report.battle_id));
    let record = BattleRecord::new(report.clone(), chrono::Utc::now());
    assert_eq!(
        coordination::battle::validate_record(&record),
        IntegrityStatus::Valid
    );
    record.save(&path).unwrap();

    let loaded = BattleRecord::load(&path).unwrap();
    assert_eq!(loaded.report, report);
}
