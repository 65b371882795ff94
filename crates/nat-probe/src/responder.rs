//! Target-side probe responder.
//!
//! Answers probes with the source address it observed and, when the probe
//! carries a `callback_url`, calls the caller back on that URL so the
//! caller can observe the reverse path too.

use crate::token::TokenProvider;
use crate::transport::ProbeTransport;
use crate::types::{CallbackPayload, CorrelationId, ProbeResponse, UNKNOWN, unix_timestamp};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Handles `/ping` on the target side.
pub struct ProbeResponder {
    vm_id: String,
    transport: Arc<dyn ProbeTransport>,
    tokens: Arc<dyn TokenProvider>,
    callback_timeout: Duration,
    started: Instant,
}

impl ProbeResponder {
    pub fn new(
        vm_id: impl Into<String>,
        transport: Arc<dyn ProbeTransport>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            vm_id: vm_id.into(),
            transport,
            tokens,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            started: Instant::now(),
        }
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn vm_id(&self) -> &str {
        &self.vm_id
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Answer a probe observed from `source_ip`.
    pub async fn handle_ping(&self, payload: Value, source_ip: Option<String>) -> ProbeResponse {
        let correlation_id = CorrelationId::from_payload(&payload);
        let source_service = payload
            .get("source_service")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN)
            .to_string();
        let callback_url = payload
            .get("callback_url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        info!(
            source_ip = ?source_ip,
            correlation_id = %correlation_id,
            source_service = %source_service,
            "Received ping"
        );

        let mut response = ProbeResponse {
            vm_id: self.vm_id.clone(),
            source_ip: source_ip.clone(),
            timestamp: unix_timestamp(),
            correlation_id: correlation_id.clone(),
            received_data: payload,
            callback_status: None,
            callback_success: None,
            callback_response: None,
            callback_error: None,
        };

        if let Some(url) = callback_url {
            self.call_back(&url, correlation_id, source_ip, &mut response)
                .await;
        }

        response
    }

    async fn call_back(
        &self,
        url: &str,
        correlation_id: CorrelationId,
        source_ip: Option<String>,
        response: &mut ProbeResponse,
    ) {
        info!(url = %url, correlation_id = %correlation_id, "Initiating callback");

        let token = self.tokens.identity_token(url).await;
        let payload = CallbackPayload {
            vm_id: self.vm_id.clone(),
            original_source_ip: source_ip,
            correlation_id,
            timestamp: unix_timestamp(),
        };
        let body = match serde_json::to_value(&payload) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to encode callback payload: {}", e);
                response.callback_error = Some(e.to_string());
                response.callback_success = Some(false);
                return;
            }
        };

        match self
            .transport
            .post_json(url, &body, token.as_deref(), self.callback_timeout)
            .await
        {
            Ok(reply) => {
                let ok = reply.is_success();
                response.callback_status = Some(reply.status);
                response.callback_success = Some(ok);
                if ok {
                    info!(status = reply.status, "Callback successful");
                    response.callback_response = Some(reply.json_or_text());
                } else {
                    warn!(status = reply.status, "Callback returned non-OK");
                    response.callback_response = Some(Value::String(reply.body));
                }
            }
            Err(e) => {
                error!("Callback failed: {}", e);
                response.callback_error = Some(e.to_string());
                response.callback_success = Some(false);
            }
        }
    }
}
