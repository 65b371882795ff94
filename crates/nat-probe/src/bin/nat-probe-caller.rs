//! Caller service binary.
//!
//! Originates probes towards the configured targets and receives their
//! callbacks. Configuration comes from an optional YAML file, overridden by
//! flags or the deployment environment (`K_SERVICE`, `VM_A_URL`, ...).

use anyhow::{Context, Result};
use clap::Parser;
use nat_probe::{
    CallerConfig, HttpTransport, Target, logging,
    server::{self, CallerState, caller_routes},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "nat-probe-caller")]
#[command(about = "Caller side of the NAT probe harness")]
#[command(version)]
struct Cli {
    /// YAML config file applied before flags and environment
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "K_SERVICE")]
    service: Option<String>,

    #[arg(long, env = "K_REVISION")]
    revision: Option<String>,

    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Base URL of target "a"
    #[arg(long, env = "VM_A_URL")]
    vm_a_url: Option<String>,

    /// Base URL of target "b"
    #[arg(long, env = "VM_B_URL")]
    vm_b_url: Option<String>,

    /// Extra or overriding target as NAME=URL (repeatable)
    #[arg(long = "target", value_parser = parse_target)]
    targets: Vec<Target>,

    /// Public base URL targets use for callbacks; callbacks disabled when empty
    #[arg(long, env = "CALLBACK_BASE_URL")]
    callback_base_url: Option<String>,

    #[arg(long)]
    probe_timeout_secs: Option<u64>,

    #[arg(long)]
    default_callback_wait_ms: Option<u64>,

    /// Evict callback records older than this many seconds
    #[arg(long)]
    callback_ttl_secs: Option<u64>,

    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

fn parse_target(raw: &str) -> Result<Target, String> {
    match raw.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => Ok(Target::new(name, url)),
        _ => Err(format!("expected NAME=URL, got '{raw}'")),
    }
}

impl Cli {
    fn into_config(self) -> Result<CallerConfig> {
        let mut config = match &self.config {
            Some(path) => CallerConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => CallerConfig::default(),
        };

        if let Some(service) = self.service {
            config.service = service;
        }
        if let Some(revision) = self.revision {
            config.revision = revision;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(url) = self.vm_a_url {
            config.targets.upsert(Target::new("a", url));
        }
        if let Some(url) = self.vm_b_url {
            config.targets.upsert(Target::new("b", url));
        }
        for target in self.targets {
            config.targets.upsert(target);
        }
        if let Some(base) = self.callback_base_url {
            config.callback_base_url = Some(base);
        }
        if let Some(secs) = self.probe_timeout_secs {
            config.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.default_callback_wait_ms {
            config.default_callback_wait = Duration::from_millis(ms);
        }
        if let Some(secs) = self.callback_ttl_secs {
            config.callback_ttl = Some(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs)?;

    let config = cli.into_config()?;
    info!(
        service = %config.service,
        revision = %config.revision,
        targets = config.targets.len(),
        callback_url = ?config.callback_url(),
        "Starting caller service"
    );

    let transport = HttpTransport::new().context("building HTTP client")?;
    let addr = config.bind_addr();
    let state = CallerState::new(config, Arc::new(transport));
    let sweeper = state.spawn_sweeper();

    server::serve(addr, caller_routes(state))
        .await
        .with_context(|| format!("serving on {addr}"))?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    Ok(())
}
