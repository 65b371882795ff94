//! Wire types shared by the caller and target services.
//!
//! Field names here are the interop contract between the two sides and
//! must not change. Everything optional on the wire is an `Option` with
//! `skip_serializing_if`, so missing fields stay missing rather than
//! turning into `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Sentinel used when an inbound payload carries no correlation id.
pub const UNKNOWN: &str = "unknown";

/// Opaque token joining a probe to its eventual callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random (v4 UUID) correlation id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The shared id that malformed callbacks collapse onto.
    pub fn unknown() -> Self {
        Self(UNKNOWN.to_string())
    }

    /// Extract a correlation id from a free-form JSON payload.
    ///
    /// Anything other than a non-empty string under `correlation_id`
    /// yields [`CorrelationId::unknown`].
    pub fn from_payload(payload: &Value) -> Self {
        payload
            .get("correlation_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(Self::from)
            .unwrap_or_else(Self::unknown)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seconds since the Unix epoch with microsecond precision.
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Round a millisecond figure to two decimals for reporting.
pub fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}

/// Body POSTed by the caller to `<target>/ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub correlation_id: CorrelationId,
    pub source_service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl ProbeRequest {
    /// Bare probe carrying only the id and the originating service.
    pub fn minimal(correlation_id: CorrelationId, source_service: impl Into<String>) -> Self {
        Self {
            correlation_id,
            source_service: source_service.into(),
            source_revision: None,
            timestamp: None,
            data: None,
            callback_url: None,
        }
    }

    /// Stamp the request with the current time.
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(unix_timestamp());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.source_revision = Some(revision.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_callback(mut self, callback_url: Option<String>) -> Self {
        self.callback_url = callback_url;
        self
    }
}

/// Body returned by the target from `/ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub vm_id: String,
    pub source_ip: Option<String>,
    pub timestamp: f64,
    pub correlation_id: CorrelationId,
    pub received_data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_error: Option<String>,
}

/// Body POSTed by the target back to the caller's `/callback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub vm_id: String,
    pub original_source_ip: Option<String>,
    pub correlation_id: CorrelationId,
    pub timestamp: f64,
}

/// Acknowledgement returned by the caller for every callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackAck {
    pub status: String,
    pub correlation_id: CorrelationId,
    pub service: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_from_payload_falls_back_to_unknown() {
        assert!(CorrelationId::from_payload(&json!({})).is_unknown());
        assert!(CorrelationId::from_payload(&json!({"correlation_id": 42})).is_unknown());
        assert!(CorrelationId::from_payload(&json!({"correlation_id": ""})).is_unknown());
        assert!(CorrelationId::from_payload(&json!("not an object")).is_unknown());
        assert_eq!(
            CorrelationId::from_payload(&json!({"correlation_id": "abc"})).as_str(),
            "abc"
        );
    }

    #[test]
    fn test_empty_correlation_id_shares_unknown_slot() {
        // An empty id is not kept under its own "" key; it joins "unknown".
        let empty = CorrelationId::from_payload(&json!({"correlation_id": ""}));
        assert_eq!(empty.as_str(), UNKNOWN);
        assert_eq!(empty, CorrelationId::from_payload(&json!({})));
    }

    #[test]
    fn test_minimal_probe_omits_optional_fields() {
        let req = ProbeRequest::minimal(CorrelationId::from("id-1"), "svc");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"correlation_id": "id-1", "source_service": "svc"}));
    }

    #[test]
    fn test_full_probe_serialization() {
        let req = ProbeRequest::minimal(CorrelationId::from("id-2"), "svc")
            .with_revision("rev-7")
            .stamped()
            .with_data(json!({"k": "v"}))
            .with_callback(Some("https://caller/callback".to_string()));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["callback_url"], "https://caller/callback");
        assert_eq!(value["source_revision"], "rev-7");
        assert_eq!(value["data"]["k"], "v");
        assert!(value["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_round_ms() {
        assert_eq!(round_ms(12.3456), 12.35);
        assert_eq!(round_ms(0.0), 0.0);
    }
}
