//! Tracing subscriber bootstrap.
//!
//! Events go to stderr so that query output on stdout stays machine
//! readable. `ZK_LOG` takes precedence over the configured level and accepts
//! full `EnvFilter` directives (`zettel=debug,zettel_core=trace`).

use std::sync::Once;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "ZK_LOG";

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .with_context(|| format!("invalid {LOG_ENV} directives: {directives}"))?,
        _ => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level: {level}"))?,
    };

    INIT.call_once(|| {
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
        // Another subscriber may already be set, e.g. by a test harness.
        if installed.is_err() {
            tracing::debug!("global subscriber already installed");
        }
    });
    Ok(())
}
