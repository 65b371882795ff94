//! Target server binary.
//!
//! Runs on the VMs behind the network boundary under test. Answers probes
//! with the source address it saw and calls the caller back when asked.

use anyhow::{Context, Result};
use clap::Parser;
use nat_probe::{
    HttpTransport, MetadataTokenProvider, NoTokenProvider, ProbeResponder, TargetConfig,
    TokenProvider, logging,
    server::{self, TargetState, target_routes},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "nat-probe-target")]
#[command(about = "Target side of the NAT probe harness")]
#[command(version)]
struct Cli {
    /// YAML config file applied before flags and environment
    #[arg(long)]
    config: Option<PathBuf>,

    /// Identity reported in responses (defaults to HOSTNAME)
    #[arg(long, env = "VM_ID")]
    vm_id: Option<String>,

    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Send callbacks without fetching metadata identity tokens
    #[arg(long)]
    no_metadata_tokens: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn into_config(self) -> Result<TargetConfig> {
        let mut config = match &self.config {
            Some(path) => TargetConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => TargetConfig::default(),
        };
        if let Some(vm_id) = self.vm_id {
            config.vm_id = vm_id;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.no_metadata_tokens {
            config.metadata_tokens = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs)?;

    let config = cli.into_config()?;
    info!(
        vm_id = %config.vm_id,
        port = config.port,
        metadata_tokens = config.metadata_tokens,
        "Starting target server"
    );

    let client = reqwest::Client::builder()
        .build()
        .context("building HTTP client")?;
    let tokens: Arc<dyn TokenProvider> = if config.metadata_tokens {
        Arc::new(MetadataTokenProvider::new(client.clone()).timeout(config.token_timeout))
    } else {
        Arc::new(NoTokenProvider)
    };
    let responder = ProbeResponder::new(
        config.vm_id.clone(),
        Arc::new(HttpTransport::with_client(client)),
        tokens,
    )
    .with_callback_timeout(config.callback_timeout);

    let addr = config.bind_addr();
    server::serve(addr, target_routes(TargetState::new(responder)))
        .await
        .with_context(|| format!("serving on {addr}"))?;

    Ok(())
}
