use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use battle_agents::backends::ReplayScript;
use battle_agents::config::{check_endpoint, BattleSettings};
use battle_agents::report::{render_transcript, write_report};
use battle_agents::runner::{build_orchestrator, live_orchestrator};
use clap::{Parser, Subcommand};
use coordination::battle::{
    validate_record, BattleOrchestrator, BattleRecord, FixedClock, IntegrityStatus,
};
use tracing::{info, warn};

/// Adversarial evaluator/respondent email battles between two models.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file overlaid on the environment defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one battle against the configured endpoints
    Run {
        /// Follow-up round ceiling (overrides BATTLE_MAX_ROUNDS)
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Wall-clock budget for the whole battle, in seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Where to write the JSON record and transcript
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Replay a battle from scripted model outputs (JSON)
    Replay {
        #[arg(long)]
        script: PathBuf,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Validate and print a saved battle record
    Show { record: PathBuf },

    /// Probe both endpoints
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut settings = match &args.config {
        Some(path) => BattleSettings::load(path)?,
        None => BattleSettings::default(),
    };

    match args.command {
        Command::Run {
            max_rounds,
            deadline_secs,
            output_dir,
        } => {
            if let Some(v) = max_rounds {
                settings.max_rounds = v;
            }
            if deadline_secs.is_some() {
                settings.deadline_secs = deadline_secs;
            }
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            info!(
                evaluator = %settings.evaluator.model,
                respondent = %settings.respondent.model,
                max_rounds = settings.max_rounds,
                "Email battle starting"
            );
            let orchestrator = live_orchestrator(&settings)?;
            run_and_save(orchestrator, &settings).await
        }
        Command::Replay { script, output_dir } => {
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            let script = ReplayScript::load(&script)?;
            let (evaluator, respondent) = script.backends();
            let orchestrator = build_orchestrator(&settings, evaluator, respondent)?
                .with_clock(Arc::new(FixedClock::starting_at_epoch_morning()));
            run_and_save(orchestrator, &settings).await
        }
        Command::Show { record } => {
            let text = std::fs::read_to_string(&record)
                .with_context(|| format!("Failed to read {}", record.display()))?;
            let parsed = BattleRecord::from_json(&text)?;
            match validate_record(&parsed) {
                IntegrityStatus::Valid => info!("Record is valid"),
                IntegrityStatus::Recoverable { warnings } => {
                    for w in &warnings {
                        warn!(warning = %w, "Record integrity warning");
                    }
                }
                IntegrityStatus::Corrupted { errors } => {
                    anyhow::bail!("Record {} is corrupted: {}", record.display(), errors.join("; "));
                }
            }
            println!("{}", render_transcript(&parsed.report));
            Ok(())
        }
        Command::Check => {
            let (evaluator_ok, respondent_ok) = futures::join!(
                check_endpoint(&settings.evaluator),
                check_endpoint(&settings.respondent)
            );
            info!(url = %settings.evaluator.url, up = evaluator_ok, "Evaluator endpoint");
            info!(url = %settings.respondent.url, up = respondent_ok, "Respondent endpoint");
            if !(evaluator_ok && respondent_ok) {
                anyhow::bail!("One or more endpoints unreachable");
            }
            Ok(())
        }
    }
}

async fn run_and_save(
    orchestrator: BattleOrchestrator,
    settings: &BattleSettings,
) -> Result<()> {
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling battle");
            cancel.cancel();
        }
    });

    let report = orchestrator.run().await.context("Battle failed")?;
    let (json_path, txt_path) = write_report(&report, &settings.output_dir)?;
    info!(
        record = %json_path.display(),
        transcript = %txt_path.display(),
        "Battle saved"
    );
    info!("{}", report.outcome.summary_line());

    println!("{}", render_transcript(&report));
    Ok(())
}
