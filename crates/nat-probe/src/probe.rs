//! Probe client.
//!
//! Sends exactly one probe per call and folds every result, including
//! transport failures, into a [`ProbeOutcome`]. A target that answers with
//! a non-2xx status still counts as a completed probe.

use crate::transport::{ProbeTransport, TransportResponse};
use crate::types::{CorrelationId, ProbeRequest, round_ms};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Default per-attempt timeout for outbound probes.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a single probe attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub correlation_id: CorrelationId,
    /// True when the HTTP exchange completed, whatever the status
    pub success: bool,
    pub elapsed_ms: f64,
    #[serde(rename = "status_code", skip_serializing_if = "Option::is_none")]
    pub remote_status: Option<u16>,
    /// Parsed JSON on 2xx (text if unparseable), raw text otherwise
    #[serde(rename = "response", skip_serializing_if = "Option::is_none")]
    pub remote_body: Option<Value>,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ProbeOutcome {
    fn completed(correlation_id: CorrelationId, elapsed: Duration, reply: TransportResponse) -> Self {
        let remote_body = if reply.is_success() {
            reply.json_or_text()
        } else {
            Value::String(reply.body)
        };
        Self {
            correlation_id,
            success: true,
            elapsed_ms: round_ms(elapsed.as_secs_f64() * 1000.0),
            remote_status: Some(reply.status),
            remote_body: Some(remote_body),
            error_detail: None,
        }
    }

    fn failed(correlation_id: CorrelationId, elapsed: Duration, error: String) -> Self {
        Self {
            correlation_id,
            success: false,
            elapsed_ms: round_ms(elapsed.as_secs_f64() * 1000.0),
            remote_status: None,
            remote_body: None,
            error_detail: Some(error),
        }
    }

    /// True when the target answered with a 2xx status.
    pub fn remote_ok(&self) -> bool {
        matches!(self.remote_status, Some(s) if (200..300).contains(&s))
    }

    /// Source address the target reports having seen, if it answered 2xx.
    pub fn observed_source_ip(&self) -> Option<String> {
        if !self.remote_ok() {
            return None;
        }
        self.remote_body
            .as_ref()?
            .get("source_ip")?
            .as_str()
            .map(str::to_string)
    }
}

/// Issues probes over a [`ProbeTransport`].
#[derive(Clone)]
pub struct ProbeClient {
    transport: Arc<dyn ProbeTransport>,
    timeout: Duration,
}

impl ProbeClient {
    pub fn new(transport: Arc<dyn ProbeTransport>) -> Self {
        Self::with_timeout(transport, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(transport: Arc<dyn ProbeTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `request` to `<target_base>/ping`.
    pub async fn send(&self, target_base: &str, request: &ProbeRequest) -> ProbeOutcome {
        let url = ping_url(target_base);
        let correlation_id = request.correlation_id.clone();

        let body = match serde_json::to_value(request) {
            Ok(body) => body,
            Err(e) => {
                return ProbeOutcome::failed(
                    correlation_id,
                    Duration::ZERO,
                    format!("failed to encode probe: {e}"),
                );
            }
        };

        let started = Instant::now();
        let result = self
            .transport
            .post_json(&url, &body, None, self.timeout)
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(reply) => {
                let outcome = ProbeOutcome::completed(correlation_id, elapsed, reply);
                info!(
                    correlation_id = %outcome.correlation_id,
                    url = %url,
                    status = ?outcome.remote_status,
                    elapsed_ms = outcome.elapsed_ms,
                    "Probe completed"
                );
                outcome
            }
            Err(e) => {
                warn!(correlation_id = %correlation_id, url = %url, "Probe failed: {}", e);
                ProbeOutcome::failed(correlation_id, elapsed, e.to_string())
            }
        }
    }
}

/// `<base>/ping`, tolerating a trailing slash on the base.
pub fn ping_url(target_base: &str) -> String {
    format!("{}/ping", target_base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;
    use serde_json::json;

    fn request(id: &str) -> ProbeRequest {
        ProbeRequest::minimal(CorrelationId::from(id), "caller").stamped()
    }

    #[tokio::test]
    async fn test_successful_probe() {
        let transport =
            Arc::new(ScriptedTransport::new().reply(200, r#"{"source_ip":"100.64.0.7"}"#));
        let client = ProbeClient::new(transport.clone());

        let outcome = client.send("http://10.1.0.10:8080/", &request("p1")).await;

        assert!(outcome.success);
        assert_eq!(outcome.remote_status, Some(200));
        assert_eq!(outcome.observed_source_ip().as_deref(), Some("100.64.0.7"));
        assert!(outcome.error_detail.is_none());

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "http://10.1.0.10:8080/ping");
        assert_eq!(calls[0].body["correlation_id"], "p1");
        assert_eq!(calls[0].timeout, DEFAULT_PROBE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_unreachable_target_is_failure_not_panic() {
        let transport = Arc::new(ScriptedTransport::new().refuse("http://10.9.9.9:8080/ping"));
        let client = ProbeClient::new(transport);

        let outcome = client.send("http://10.9.9.9:8080", &request("p2")).await;

        assert!(!outcome.success);
        let error = outcome.error_detail.as_deref().unwrap();
        assert!(!error.is_empty());
        assert!(outcome.remote_status.is_none());

        let wire = serde_json::to_value(&outcome).unwrap();
        assert_eq!(wire["success"], false);
        assert!(wire["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn test_remote_error_is_completed_probe() {
        let transport = Arc::new(ScriptedTransport::new().reply(503, "upstream unavailable"));
        let client = ProbeClient::new(transport);

        let outcome = client.send("http://target", &request("p3")).await;

        assert!(outcome.success);
        assert!(!outcome.remote_ok());
        assert_eq!(outcome.remote_status, Some(503));
        assert_eq!(outcome.remote_body, Some(json!("upstream unavailable")));
        assert!(outcome.observed_source_ip().is_none());
    }

    #[tokio::test]
    async fn test_non_json_success_body_kept_as_text() {
        let transport = Arc::new(ScriptedTransport::new().reply(200, "pong"));
        let client = ProbeClient::new(transport);

        let outcome = client.send("http://target", &request("p4")).await;

        assert_eq!(outcome.remote_body, Some(json!("pong")));
        assert!(outcome.observed_source_ip().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_reflects_transport_latency() {
        let transport = Arc::new(ScriptedTransport::new().reply_after(
            Duration::from_millis(42),
            200,
            "{}",
        ));
        let client = ProbeClient::with_timeout(transport.clone(), Duration::from_secs(3));

        let outcome = client.send("http://target", &request("p5")).await;

        assert_eq!(outcome.elapsed_ms, 42.0);
        assert_eq!(transport.calls()[0].timeout, Duration::from_secs(3));
    }
}
