//! Tracing subscriber setup for the `hrag` binary.
//!
//! Logs go to stderr so stdout carries only command output (answers,
//! `--json` documents). Verbosity follows `RUST_LOG`, default `info`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `json` switches to one JSON object per
/// event. Calling it twice is harmless; the second call is ignored.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing already initialized");
    }
}
