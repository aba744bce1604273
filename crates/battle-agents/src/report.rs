//! Human-readable transcripts and on-disk battle artifacts.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use coordination::battle::{BattleRecord, BattleReport, Message, Role};

const RULE: &str = "================================================================";
const THIN_RULE: &str = "----------------------------------------------------------------";

fn side_label(role: Role) -> &'static str {
    match role {
        Role::Evaluator => "EVALUATOR",
        Role::Respondent => "RESPONDENT",
    }
}

/// One message as it appears in a transcript.
pub fn render_message(index: usize, message: &Message) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{THIN_RULE}");
    let _ = writeln!(
        out,
        "#{index} [{}] round {}",
        side_label(message.sender),
        message.round
    );
    let _ = writeln!(out, "From: {}", message.from);
    let _ = writeln!(out, "To: {}", message.to);
    let _ = writeln!(out, "Subject: {}", message.subject);
    let _ = writeln!(
        out,
        "Date: {}",
        message.timestamp.format("%a, %d %b %Y %H:%M:%S UTC")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", message.body.trim_end());
    out
}

/// Full transcript followed by the result banner.
pub fn render_transcript(report: &BattleReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "EMAIL BATTLE {}", report.battle_id);
    let _ = writeln!(
        out,
        "evaluator: {} | respondent: {}",
        report.evaluator_model, report.respondent_model
    );
    let _ = writeln!(out, "{RULE}");

    for (i, message) in report.thread.messages.iter().enumerate() {
        out.push_str(&render_message(i + 1, message));
        out.push('\n');
    }

    let outcome = &report.outcome;
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "RESULT: {}", outcome.kind);
    let _ = writeln!(out, "Winner: {}", outcome.winner);
    let _ = writeln!(out, "Follow-up rounds: {}", outcome.total_rounds);
    let _ = writeln!(out, "Messages: {}", outcome.total_messages);
    if let Some(decision) = &report.thread.decision {
        if !decision.rationale.trim().is_empty() {
            let _ = writeln!(out, "Last verdict: {} ({})", decision.verdict, decision.rationale.trim());
        }
    }
    let _ = write!(out, "{RULE}");
    out
}

/// Write `<battle_id>.json` and `<battle_id>.txt` into `dir`.
pub fn write_report(report: &BattleReport, dir: &Path) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output dir {}", dir.display()))?;

    let json_path = dir.join(format!("{}.json", report.battle_id));
    BattleRecord::new(report.clone(), Utc::now())
        .save(&json_path)
        .with_context(|| format!("Failed to save battle record {}", json_path.display()))?;

    let txt_path = dir.join(format!("{}.txt", report.battle_id));
    std::fs::write(&txt_path, render_transcript(report))
        .with_context(|| format!("Failed to write transcript {}", txt_path.display()))?;

    Ok((json_path, txt_path))
}
