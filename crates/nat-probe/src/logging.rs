//! Logging setup shared by both binaries.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set. Otherwise this crate logs at `info`, or
/// `debug` when `verbose`, and HTTP internals stay at `warn`.
pub fn init(verbose: bool, json: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "nat_probe={level},nat_probe_caller={level},nat_probe_target={level},hyper=warn,reqwest=warn,info"
        ))
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).compact())
            .try_init()?;
    }

    Ok(())
}
