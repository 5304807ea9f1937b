//! Diagnostic logging to stderr.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::settings::LOG_ENV_VAR;

/// Installs the global subscriber. Directives come from `AGENT_LOOP_LOG`
/// (`EnvFilter` syntax) and default to `warn`.
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
