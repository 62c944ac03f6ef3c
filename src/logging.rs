//! Diagnostic logging setup (tracing)
//!
//! Human-facing diagnostics only - the deterministic trace path in
//! [`crate::tracelog`] is a separate binary pipeline and never goes
//! through here.
//!
//! Two knobs matter for a latency engine:
//! - the file sink is optional (`dir: ~` keeps a stdout-only process, the
//!   usual shape under a supervisor) and always non-blocking; keep the
//!   returned guard alive for the process lifetime or tail lines get lost;
//! - `quiet_hot_loop` damps the targets that can emit per market event
//!   (pipeline, ingress, router) to warn, so diagnostics can run at info
//!   without the hot thread formatting log lines per tick. `RUST_LOG`
//!   overrides everything when set.

use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Targets allowed to log on the event path; damped by `quiet_hot_loop`
const HOT_LOOP_TARGETS: [&str; 3] = ["submicro::pipeline", "submicro::ingress", "submicro::router"];

/// Log-file rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Hourly,
    Daily,
    Never,
}

/// Diagnostic log settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory for the file sink; None logs to stdout only
    pub dir: Option<String>,
    pub file: String,
    pub rotation: Rotation,
    /// Base level for everything not named in a directive
    pub level: String,
    /// JSON lines in the file sink (stdout stays human-formatted)
    pub json: bool,
    /// Cap per-event targets at warn regardless of the base level
    pub quiet_hot_loop: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: Some("logs".to_string()),
            file: "submicro.log".to_string(),
            rotation: Rotation::Daily,
            level: "info".to_string(),
            json: false,
            quiet_hot_loop: false,
        }
    }
}

/// EnvFilter directive string for this config.
///
/// Base level first, then per-target caps for the hot-loop modules when
/// damping is on.
fn filter_directives(config: &LogConfig) -> String {
    let mut directives = config.level.clone();
    if config.quiet_hot_loop {
        for target in HOT_LOOP_TARGETS {
            directives.push(',');
            directives.push_str(target);
            directives.push_str("=warn");
        }
    }
    directives
}

/// Install the global subscriber. Returns the file sink's flush guard, or
/// None when running stdout-only.
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    // Thread names distinguish the hot loop from trace-writer/stdin-watch
    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_thread_names(true)
        .with_ansi(true);
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer);

    let Some(dir) = &config.dir else {
        registry.init();
        return None;
    };

    let appender = match config.rotation {
        Rotation::Hourly => tracing_appender::rolling::hourly(dir, &config.file),
        Rotation::Daily => tracing_appender::rolling::daily(dir, &config.file),
        Rotation::Never => tracing_appender::rolling::never(dir, &config.file),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    if config.json {
        registry
            .with(fmt::layer().json().with_writer(non_blocking).with_ansi(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_names(true)
                    .with_writer(non_blocking)
                    .with_ansi(false),
            )
            .init();
    }
    Some(guard)
}
