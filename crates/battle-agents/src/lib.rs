//! Live model backends, configuration, prompts and reporting for the
//! email battle orchestrator in `coordination::battle`.

pub mod backends;
pub mod config;
pub mod prompts;
pub mod report;
pub mod runner;
