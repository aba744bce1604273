//! Wires settings, personas and backends into an orchestrator.

use std::sync::Arc;

use anyhow::Result;
use coordination::battle::{Agent, BattleOrchestrator, ModelBackend};

use crate::backends::build_backend;
use crate::config::BattleSettings;

/// Build an orchestrator over explicit backends.
///
/// Sampling comes from the role's endpoint settings; personas from the
/// configured files or the built-in defaults.
pub fn build_orchestrator(
    settings: &BattleSettings,
    evaluator_backend: Arc<dyn ModelBackend>,
    respondent_backend: Arc<dyn ModelBackend>,
) -> Result<BattleOrchestrator> {
    let config = settings.battle_config();
    let (evaluator_persona, respondent_persona) = settings.personas(&config.envelope)?;

    let evaluator = Agent::new(evaluator_persona, evaluator_backend).with_sampling(
        settings.evaluator.temperature,
        settings.evaluator.max_tokens,
    );
    let respondent = Agent::new(respondent_persona, respondent_backend).with_sampling(
        settings.respondent.temperature,
        settings.respondent.max_tokens,
    );

    Ok(BattleOrchestrator::new(evaluator, respondent, config)
        .with_refusal_detector(settings.refusal_detector()))
}

/// Build an orchestrator over the configured live endpoints.
pub fn live_orchestrator(settings: &BattleSettings) -> Result<BattleOrchestrator> {
    let evaluator = build_backend(&settings.evaluator)?;
    let respondent = build_backend(&settings.respondent)?;
    build_orchestrator(settings, evaluator, respondent)
}
