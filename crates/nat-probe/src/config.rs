//! Service configuration.
//!
//! Both services start from [`Default`], optionally overlay a YAML file and
//! then apply command-line/environment overrides in the binaries.
//!
//! ```yaml
//! service: caller-a
//! revision: caller-a-00042
//! port: 8080
//! callback_base_url: https://caller-a-xyz.a.run.app
//! probe_timeout: 30s
//! default_callback_wait: 5s
//! callback_ttl: 1h
//! targets:
//!   - name: a
//!     url: http://10.1.0.10:8080
//!   - name: b
//!     url: http://10.2.0.10:8080
//! ```

use crate::coordinator::{CoordinatorConfig, DEFAULT_CALLBACK_WAIT};
use crate::error::{HarnessError, Result};
use crate::probe::DEFAULT_PROBE_TIMEOUT;
use crate::registry::DEFAULT_POLL_INTERVAL;
use crate::responder::DEFAULT_CALLBACK_TIMEOUT;
use crate::targets::TargetSet;
use crate::token::DEFAULT_TOKEN_TIMEOUT;
use crate::types::UNKNOWN;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;

/// Configuration for the caller service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallerConfig {
    pub service: String,
    pub revision: String,
    pub port: u16,
    pub targets: TargetSet,
    /// Public base URL targets use to reach this service; callbacks are off when unset
    pub callback_base_url: Option<String>,
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub default_callback_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Evict callback records older than this; unset keeps them forever
    #[serde(with = "humantime_serde")]
    pub callback_ttl: Option<Duration>,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            service: UNKNOWN.to_string(),
            revision: UNKNOWN.to_string(),
            port: DEFAULT_PORT,
            targets: TargetSet::default(),
            callback_base_url: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            default_callback_wait: DEFAULT_CALLBACK_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            callback_ttl: None,
        }
    }
}

impl CallerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_yaml(path)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// `<callback_base_url>/callback`, if a base URL is configured.
    pub fn callback_url(&self) -> Option<String> {
        self.callback_base_url
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .map(|base| format!("{}/callback", base.trim_end_matches('/')))
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            service: self.service.clone(),
            revision: self.revision.clone(),
            callback_url: self.callback_url(),
            default_wait: self.default_callback_wait,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(HarnessError::NoTargets);
        }
        if self.poll_interval.is_zero() {
            return Err(HarnessError::Config(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(HarnessError::Config(
                "probe_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the target server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub vm_id: String,
    pub port: u16,
    /// Fetch identity tokens from the metadata server for callbacks
    pub metadata_tokens: bool,
    #[serde(with = "humantime_serde")]
    pub callback_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub token_timeout: Duration,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            vm_id: default_vm_id(),
            port: DEFAULT_PORT,
            metadata_tokens: true,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }
}

impl TargetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_yaml(path)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

/// `HOSTNAME`, then the OS hostname, then `"unknown"`.
pub fn default_vm_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}
