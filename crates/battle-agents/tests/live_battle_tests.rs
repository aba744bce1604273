//! Live battle tests: require reachable endpoints and API keys.
//!
//! All tests are `#[ignore]`; run with `cargo test -p battle-agents -- --ignored`.

use battle_agents::config::{check_endpoint, BattleSettings};
use battle_agents::report::render_transcript;
use battle_agents::runner::live_orchestrator;
use coordination::battle::{validate_record, BattleRecord};

#[tokio::test]
#[ignore]
async fn test_endpoints_reachable() {
    let settings = BattleSettings::default();
    assert!(
        check_endpoint(&settings.evaluator).await,
        "evaluator endpoint {} unreachable",
        settings.evaluator.url
    );
    assert!(
        check_endpoint(&settings.respondent).await,
        "respondent endpoint {} unreachable",
        settings.respondent.url
    );
}

#[tokio::test]
#[ignore]
async fn test_short_live_battle_concludes() {
    let mut settings = BattleSettings::default();
    settings.max_rounds = 1;
    settings.deadline_secs = Some(300);

    let report = live_orchestrator(&settings)
        .expect("orchestrator from environment")
        .run()
        .await
        .expect("battle concludes");

    assert!(report.thread.round <= 1);
    assert!(report.thread.messages.len() >= 2);
    let record = BattleRecord::new(report.clone(), chrono::Utc::now());
    assert!(validate_record(&record).is_usable());
    println!("{}", render_transcript(&report));
}
