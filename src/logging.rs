//! Structured logging setup for the `pbars` binary.
//!
//! Filtering is driven by `PBARS_LOG` rather than `RUST_LOG`, so this
//! process's verbosity doesn't get tangled up with whatever else in a
//! deployment also reads the stdlib-conventional env var.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init(verbose: bool, filter_override: Option<&str>) -> anyhow::Result<()> {
    let default_directive = if verbose { "pbars=debug,info" } else { "pbars=info,warn" };
    let env_filter = filter_override
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::try_from_env("PBARS_LOG").unwrap_or_else(|_| EnvFilter::new(default_directive)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).compact())
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}
