//! Diagnostic tracing for the `delegator` binary.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG` (default `warn`).
//! It is separate from the run log under `runs_dir`, which records model
//! prompts, responses and executor output regardless of `RUST_LOG`.
//!
//! ```bash
//! RUST_LOG=delegator::agents=debug,delegator=info delegator run "download a.csv from bucket B"
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVES: &str = "warn";

/// Install the global subscriber. Call once, before any command runs.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .init();
}
