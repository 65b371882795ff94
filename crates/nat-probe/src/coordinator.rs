//! Round-trip coordination.
//!
//! A round trip is one probe to a target plus, when the caller has a
//! callback address, the wait for that target to call back with the same
//! correlation id.
//!
//! ```text
//!   Probing ──transport failure──────────────► finalize {ping_vm}
//!      │
//!      ├── no callback address ──────────────► finalize {ping_vm}
//!      │
//!      └── AwaitingCallback ──record/timeout─► finalize {ping_vm, callback}
//! ```
//!
//! The overall result succeeds only if every phase present succeeded.

use crate::error::HarnessError;
use crate::probe::{ProbeClient, ProbeOutcome};
use crate::registry::{AwaitOutcome, CallbackRecord, CorrelationRegistry};
use crate::targets::{Target, TargetSet};
use crate::types::{CorrelationId, ProbeRequest, round_ms};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Default time to wait for a callback after a successful probe.
pub const DEFAULT_CALLBACK_WAIT: Duration = Duration::from_millis(5000);

/// Error text reported when no callback arrives in time.
pub const CALLBACK_TIMEOUT_ERROR: &str = "timeout waiting for callback";

/// Identity and callback settings the coordinator stamps onto probes.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub service: String,
    pub revision: String,
    /// Full URL the target should call back on, if callbacks are enabled
    pub callback_url: Option<String>,
    pub default_wait: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            service: "unknown".to_string(),
            revision: "unknown".to_string(),
            callback_url: None,
            default_wait: DEFAULT_CALLBACK_WAIT,
        }
    }
}

/// Result of a single `/ping-vm` style probe.
#[derive(Debug, Clone, Serialize)]
pub struct PingResult {
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
    pub target: String,
    pub target_url: String,
}

/// Probe phase as reported in a round-trip result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbePhase {
    pub success: bool,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_saw_source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ProbeOutcome> for ProbePhase {
    fn from(outcome: &ProbeOutcome) -> Self {
        Self {
            success: outcome.success,
            elapsed_ms: outcome.elapsed_ms,
            status_code: outcome.remote_status,
            vm_saw_source_ip: outcome.observed_source_ip(),
            error: outcome.error_detail.clone(),
        }
    }
}

/// Callback phase: the matching record, or a timeout marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "CallbackPhaseWire")]
pub enum CallbackPhase {
    /// `elapsed_ms` is measured from probe send, not from the start of the wait
    Received {
        elapsed_ms: f64,
        record: CallbackRecord,
    },
    TimedOut {
        waited: Duration,
    },
}

impl CallbackPhase {
    pub fn success(&self) -> bool {
        matches!(self, CallbackPhase::Received { .. })
    }
}

#[derive(Serialize)]
struct CallbackPhaseWire {
    success: bool,
    elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<CallbackPhase> for CallbackPhaseWire {
    fn from(phase: CallbackPhase) -> Self {
        match phase {
            CallbackPhase::Received { elapsed_ms, record } => Self {
                success: true,
                elapsed_ms,
                callback_source_ip: record.source_ip,
                callback_data: Some(record.data),
                error: None,
            },
            CallbackPhase::TimedOut { waited } => Self {
                success: false,
                elapsed_ms: round_ms(waited.as_secs_f64() * 1000.0),
                callback_source_ip: None,
                callback_data: None,
                error: Some(CALLBACK_TIMEOUT_ERROR.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Phases {
    #[serde(rename = "ping_vm")]
    pub probe: ProbePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackPhase>,
}

impl Phases {
    /// Logical AND over the phases present.
    pub fn all_succeeded(&self) -> bool {
        self.probe.success && self.callback.as_ref().is_none_or(CallbackPhase::success)
    }
}

/// Completed round trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundTripResult {
    pub correlation_id: CorrelationId,
    pub target: String,
    pub service: String,
    pub phases: Phases,
    pub total_elapsed_ms: f64,
    #[serde(rename = "success")]
    pub overall_success: bool,
}

/// Drives single probes and probe-plus-callback round trips.
pub struct RoundTripCoordinator {
    probe: ProbeClient,
    registry: Arc<CorrelationRegistry>,
    targets: TargetSet,
    config: CoordinatorConfig,
}

impl RoundTripCoordinator {
    pub fn new(
        probe: ProbeClient,
        registry: Arc<CorrelationRegistry>,
        targets: TargetSet,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            probe,
            registry,
            targets,
            config,
        }
    }

    pub fn targets(&self) -> &TargetSet {
        &self.targets
    }

    /// Send one probe, soliciting a callback only if asked and configured.
    /// Does not wait for the callback.
    pub async fn ping(
        &self,
        target: &str,
        request_callback: bool,
        data: Value,
    ) -> Result<PingResult, HarnessError> {
        let target = self.targets.resolve(target)?.clone();
        let correlation_id = CorrelationId::generate();

        let callback_url = if request_callback {
            self.config.callback_url.clone()
        } else {
            None
        };
        let request = ProbeRequest::minimal(correlation_id.clone(), &self.config.service)
            .with_revision(&self.config.revision)
            .stamped()
            .with_data(data)
            .with_callback(callback_url);

        info!(correlation_id = %correlation_id, target = %target.name, url = %target.url, "Pinging target");
        let outcome = self.probe.send(&target.url, &request).await;

        Ok(PingResult {
            outcome,
            target: target.name,
            target_url: target.url,
        })
    }

    /// Run a full round trip against `target`, waiting up to `wait` (or the
    /// configured default) for the callback.
    pub async fn round_trip(
        &self,
        target: &str,
        wait: Option<Duration>,
    ) -> Result<RoundTripResult, HarnessError> {
        let target = self.targets.resolve(target)?.clone();
        let wait = wait.unwrap_or(self.config.default_wait);
        let correlation_id = CorrelationId::generate();

        let request = ProbeRequest::minimal(correlation_id.clone(), &self.config.service)
            .stamped()
            .with_callback(self.config.callback_url.clone());

        info!(correlation_id = %correlation_id, target = %target.name, "Round trip: probing target");
        let sent_at = Utc::now();
        let started = Instant::now();

        let outcome = self.probe.send(&target.url, &request).await;
        let probe = ProbePhase::from(&outcome);

        let callback = if outcome.success && self.config.callback_url.is_some() {
            info!(correlation_id = %correlation_id, wait_ms = wait.as_millis() as u64, "Waiting for callback");
            Some(self.await_callback(&correlation_id, sent_at, wait).await)
        } else {
            None
        };

        Ok(self.finalize(correlation_id, &target, Phases { probe, callback }, started))
    }

    async fn await_callback(
        &self,
        correlation_id: &CorrelationId,
        sent_at: DateTime<Utc>,
        wait: Duration,
    ) -> CallbackPhase {
        match self.registry.await_record(correlation_id, wait).await {
            AwaitOutcome::Received(record) => {
                let elapsed = (record.received_at - sent_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                CallbackPhase::Received {
                    elapsed_ms: round_ms(elapsed.as_secs_f64() * 1000.0),
                    record,
                }
            }
            AwaitOutcome::TimedOut { .. } => CallbackPhase::TimedOut { waited: wait },
        }
    }

    fn finalize(
        &self,
        correlation_id: CorrelationId,
        target: &Target,
        phases: Phases,
        started: Instant,
    ) -> RoundTripResult {
        let total_elapsed_ms = round_ms(started.elapsed().as_secs_f64() * 1000.0);
        let overall_success = phases.all_succeeded();

        info!(
            correlation_id = %correlation_id,
            success = overall_success,
            elapsed_ms = total_elapsed_ms,
            "Round trip complete"
        );

        RoundTripResult {
            correlation_id,
            target: target.name.clone(),
            service: self.config.service.clone(),
            phases,
            total_elapsed_ms,
            overall_success,
        }
    }
}
