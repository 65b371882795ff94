//! Inbound callback handling on the caller side.

use crate::registry::{CallbackRecord, CorrelationRegistry};
use crate::types::{CallbackAck, CorrelationId};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Status string carried in every callback acknowledgement.
pub const CALLBACK_RECEIVED: &str = "callback_received";

/// Records callbacks into the shared [`CorrelationRegistry`].
///
/// Payloads are stored as received. A payload without a usable
/// `correlation_id` is still accepted and lands under the shared
/// `"unknown"` key, so concurrent malformed callbacks overwrite each other.
#[derive(Debug, Clone)]
pub struct CallbackHandler {
    registry: Arc<CorrelationRegistry>,
    service: String,
}

impl CallbackHandler {
    pub fn new(registry: Arc<CorrelationRegistry>, service: impl Into<String>) -> Self {
        Self {
            registry,
            service: service.into(),
        }
    }

    pub fn receive(&self, payload: Value, observed_source: Option<String>) -> CallbackAck {
        let correlation_id = CorrelationId::from_payload(&payload);
        if correlation_id.is_unknown() {
            warn!(
                source_ip = ?observed_source,
                "Callback without correlation_id, storing under shared sentinel"
            );
        }

        info!(
            correlation_id = %correlation_id,
            source_ip = ?observed_source,
            "Received callback"
        );

        let record = CallbackRecord::new(correlation_id.clone(), observed_source, payload);
        self.registry.put(correlation_id.clone(), record);

        CallbackAck {
            status: CALLBACK_RECEIVED.to_string(),
            correlation_id,
            service: self.service.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler() -> (CallbackHandler, Arc<CorrelationRegistry>) {
        let registry = Arc::new(CorrelationRegistry::new());
        (CallbackHandler::new(registry.clone(), "caller-svc"), registry)
    }

    #[test]
    fn test_receive_records_and_acks() {
        let (handler, registry) = handler();
        let payload = json!({
            "vm_id": "vm-a",
            "original_source_ip": "100.64.0.9",
            "correlation_id": "cb-1",
            "timestamp": 1.5,
        });

        let ack = handler.receive(payload.clone(), Some("10.2.0.10".to_string()));

        assert_eq!(ack.status, CALLBACK_RECEIVED);
        assert_eq!(ack.correlation_id.as_str(), "cb-1");
        assert_eq!(ack.service, "caller-svc");

        let record = registry.get(&CorrelationId::from("cb-1")).unwrap();
        assert_eq!(record.source_ip.as_deref(), Some("10.2.0.10"));
        assert_eq!(record.data, payload);
    }

    #[test]
    fn test_missing_correlation_id_collides_on_unknown() {
        let (handler, registry) = handler();

        let first = handler.receive(json!({"vm_id": "vm-a"}), Some("10.0.0.1".to_string()));
        let second = handler.receive(json!({"vm_id": "vm-b"}), Some("10.0.0.2".to_string()));

        assert!(first.correlation_id.is_unknown());
        assert!(second.correlation_id.is_unknown());
        assert_eq!(registry.len(), 1);

        let survivor = registry.get(&CorrelationId::unknown()).unwrap();
        assert_eq!(survivor.data["vm_id"], "vm-b");
        assert_eq!(survivor.source_ip.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_empty_correlation_id_overwrites_unknown() {
        let (handler, registry) = handler();

        handler.receive(json!({"vm_id": "vm-a"}), None);
        let ack = handler.receive(json!({"vm_id": "vm-b", "correlation_id": ""}), None);

        assert!(ack.correlation_id.is_unknown());
        assert!(registry.get(&CorrelationId::from("")).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&CorrelationId::unknown()).unwrap().data["vm_id"],
            "vm-b"
        );
    }

    #[test]
    fn test_non_object_payload_is_accepted() {
        let (handler, registry) = handler();

        let ack = handler.receive(json!([1, 2, 3]), None);

        assert!(ack.correlation_id.is_unknown());
        assert_eq!(
            registry.get(&CorrelationId::unknown()).unwrap().data,
            json!([1, 2, 3])
        );
    }

    #[test]
    fn test_out_of_order_duplicates_keep_last_put() {
        let (handler, registry) = handler();

        handler.receive(json!({"correlation_id": "dup", "seq": 2}), None);
        handler.receive(json!({"correlation_id": "dup", "seq": 1}), None);

        let record = registry.get(&CorrelationId::from("dup")).unwrap();
        assert_eq!(record.data["seq"], 1);
    }
}
