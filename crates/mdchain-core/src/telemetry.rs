//! Tracing initialisation and structured chain lifecycle events.
//!
//! Call [`init_tracing`] once at program start. The `emit_*` helpers give
//! every lifecycle event a stable `event = "..."` field so JSON output can
//! be filtered by it.

use tracing::{info, warn, Level, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::stage::{StageId, Step};

/// Initialise the global tracing subscriber.
///
/// * `json` — emit newline-delimited JSON log lines.
/// * `level` — default verbosity when `RUST_LOG` is not set.
///
/// Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

/// Span tagging every event of one chain with its digest.
pub fn chain_span(digest: &str) -> Span {
    tracing::info_span!("mdchain.chain", chain = %short(digest))
}

fn short(digest: &str) -> &str {
    &digest[..12.min(digest.len())]
}

/// Plan resolved; nothing has been launched yet.
pub fn emit_chain_planned(stage_count: usize, source: &str, mode: &str) {
    info!(event = "chain.planned", stages = stage_count, source = %source, mode = %mode);
}

pub fn emit_chain_started(stage_count: usize) {
    info!(event = "chain.started", stages = stage_count);
}

pub fn emit_step_started(stage: &StageId, step: Step, input: &std::path::Path) {
    info!(
        event = "step.started",
        stage = %stage,
        step = step.name(),
        input = %input.display(),
    );
}

pub fn emit_step_finished(stage: &StageId, step: Step, exit_code: Option<i32>, duration_ms: u64) {
    info!(
        event = "step.finished",
        stage = %stage,
        step = step.name(),
        exit_code = ?exit_code,
        duration_ms = duration_ms,
    );
}

/// Stage completed; `output` is now the current coordinate file.
pub fn emit_stage_advanced(stage: &StageId, output: &std::path::Path) {
    info!(event = "stage.advanced", stage = %stage, coordinates = %output.display());
}

pub fn emit_chain_finished(completed: usize, duration_ms: u64) {
    info!(event = "chain.finished", completed = completed, duration_ms = duration_ms);
}

/// Chain aborted (warning level).
pub fn emit_chain_failed(stage: &StageId, step: Step, error: &dyn std::fmt::Display) {
    warn!(event = "chain.failed", stage = %stage, step = step.name(), error = %error);
}
