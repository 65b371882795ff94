//! Sequential bulk probing.
//!
//! Probes run strictly one after another so the order seen by each target
//! matches the order issued here.

use crate::probe::ProbeClient;
use crate::targets::Target;
use crate::types::{CorrelationId, ProbeRequest, round_ms};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of one probe inside a bulk run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkProbeResult {
    /// Iteration the probe belongs to
    pub index: u32,
    pub target: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip_seen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated statistics over a bulk run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkSummary {
    pub service: String,
    pub total_requests: usize,
    pub successful: usize,
    pub failed: usize,
    /// Mean over successful probes only; 0 if none succeeded
    pub avg_latency_ms: f64,
    /// Distinct source addresses reported by targets, unordered
    pub source_ips_seen: Vec<String>,
    pub results: Vec<BulkProbeResult>,
}

impl BulkSummary {
    pub fn from_results(service: impl Into<String>, results: Vec<BulkProbeResult>) -> Self {
        let mut successful = 0usize;
        let mut latency_total = 0.0;
        let mut source_ips = HashSet::new();

        for result in results.iter().filter(|r| r.success) {
            successful += 1;
            latency_total += result.elapsed_ms.unwrap_or(0.0);
            if let Some(ip) = &result.source_ip_seen {
                source_ips.insert(ip.clone());
            }
        }

        let avg_latency_ms = if successful == 0 {
            0.0
        } else {
            round_ms(latency_total / successful as f64)
        };

        Self {
            service: service.into(),
            total_requests: results.len(),
            successful,
            failed: results.len() - successful,
            avg_latency_ms,
            source_ips_seen: source_ips.into_iter().collect(),
            results,
        }
    }
}

/// Runs `count` iterations of one minimal probe per target.
#[derive(Clone)]
pub struct BulkRunner {
    probe: ProbeClient,
    service: String,
}

impl BulkRunner {
    pub fn new(probe: ProbeClient, service: impl Into<String>) -> Self {
        Self {
            probe,
            service: service.into(),
        }
    }

    /// Sleeps `delay` after every probe, whatever the target, when non-zero.
    pub async fn run(&self, count: u32, targets: &[Target], delay: Duration) -> BulkSummary {
        info!(
            count,
            targets = targets.len(),
            delay_ms = delay.as_millis() as u64,
            "Starting bulk probe run"
        );
        let mut results = Vec::new();

        for index in 0..count {
            for target in targets {
                let request = ProbeRequest::minimal(CorrelationId::generate(), &self.service);
                let outcome = self.probe.send(&target.url, &request).await;
                debug!(index, target = %target.name, success = outcome.success, "Bulk probe done");

                let result = if outcome.success {
                    BulkProbeResult {
                        index,
                        target: target.name.clone(),
                        success: true,
                        elapsed_ms: Some(outcome.elapsed_ms),
                        source_ip_seen: outcome.observed_source_ip(),
                        error: None,
                    }
                } else {
                    BulkProbeResult {
                        index,
                        target: target.name.clone(),
                        success: false,
                        elapsed_ms: None,
                        source_ip_seen: None,
                        error: outcome.error_detail,
                    }
                };
                results.push(result);

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let summary = BulkSummary::from_results(&self.service, results);
        info!(
            total = summary.total_requests,
            successful = summary.successful,
            failed = summary.failed,
            avg_latency_ms = summary.avg_latency_ms,
            "Bulk probe run complete"
        );
        summary
    }
}
