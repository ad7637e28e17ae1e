use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::VerbosityLevel;

/// Default filter directive for a verbosity level
pub fn default_directive(verbosity: VerbosityLevel) -> &'static str {
    match verbosity {
        VerbosityLevel::Quiet => "error",
        VerbosityLevel::Normal => "warn",
        VerbosityLevel::Verbose => "info",
    }
}

/// Install the global subscriber
///
/// Logs go to stderr: stdout carries the report, and in worker mode the
/// protocol. `RUST_LOG` overrides the verbosity-derived level.
pub fn init_tracing(verbosity: VerbosityLevel) {
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity))),
        );

    // A subscriber may already be installed when embedded or under test
    let _ = tracing_subscriber::registry().with(console_layer).try_init();
}
