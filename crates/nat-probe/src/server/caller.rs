//! Caller service routes.

use super::{lenient, millis, parse_body, parse_value, peer_ip};
use crate::bulk::{BulkRunner, BulkSummary};
use crate::callback::CallbackHandler;
use crate::config::CallerConfig;
use crate::coordinator::{PingResult, RoundTripCoordinator, RoundTripResult};
use crate::error::HarnessError;
use crate::probe::ProbeClient;
use crate::registry::CorrelationRegistry;
use crate::transport::ProbeTransport;
use crate::types::CallbackAck;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Everything the caller routes share. Built once at startup.
#[derive(Clone)]
pub struct CallerState {
    pub config: Arc<CallerConfig>,
    pub registry: Arc<CorrelationRegistry>,
    pub coordinator: Arc<RoundTripCoordinator>,
    pub callbacks: Arc<CallbackHandler>,
    pub bulk: Arc<BulkRunner>,
}

impl CallerState {
    /// Wire the core components around one registry and one transport.
    pub fn new(config: CallerConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        let registry = Arc::new(CorrelationRegistry::with_poll_interval(config.poll_interval));
        let probe = ProbeClient::with_timeout(transport, config.probe_timeout);

        let coordinator = Arc::new(RoundTripCoordinator::new(
            probe.clone(),
            registry.clone(),
            config.targets.clone(),
            config.coordinator_config(),
        ));
        let callbacks = Arc::new(CallbackHandler::new(registry.clone(), &config.service));
        let bulk = Arc::new(BulkRunner::new(probe, &config.service));

        Self {
            config: Arc::new(config),
            registry,
            coordinator,
            callbacks,
            bulk,
        }
    }

    /// Periodically evict old callback records when a TTL is configured.
    pub fn spawn_sweeper(&self) -> Option<tokio::task::JoinHandle<()>> {
        let ttl = self.config.callback_ttl?;
        let registry = self.registry.clone();
        let period = (ttl / 4).max(Duration::from_secs(1));

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = registry.prune_older_than(ttl);
                if removed > 0 {
                    tracing::debug!(removed, remaining = registry.len(), "Pruned callback records");
                }
            }
        }))
    }
}

/// Upper bound on `/bulk-test` iterations per request.
pub const MAX_BULK_COUNT: u64 = 10_000;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PingVmRequest {
    #[serde(deserialize_with = "lenient")]
    target: Option<String>,
    #[serde(deserialize_with = "lenient")]
    request_callback: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RoundTripRequest {
    #[serde(deserialize_with = "lenient")]
    target: Option<String>,
    #[serde(deserialize_with = "lenient")]
    wait_for_callback_ms: Option<f64>,
}

impl RoundTripRequest {
    /// `None` leaves the coordinator's configured default in place.
    fn wait(&self) -> Option<Duration> {
        self.wait_for_callback_ms.and_then(millis)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BulkTestRequest {
    #[serde(deserialize_with = "lenient")]
    count: Option<u64>,
    #[serde(deserialize_with = "lenient")]
    target: Option<String>,
    #[serde(deserialize_with = "lenient")]
    delay_ms: Option<f64>,
}

impl BulkTestRequest {
    fn count(&self) -> Result<u32, HarnessError> {
        match self.count {
            None => Ok(10),
            Some(count) if count <= MAX_BULK_COUNT => Ok(count as u32),
            Some(count) => Err(HarnessError::InvalidRequest(format!(
                "count {count} exceeds the maximum of {MAX_BULK_COUNT}"
            ))),
        }
    }

    fn delay(&self) -> Duration {
        self.delay_ms
            .and_then(millis)
            .unwrap_or(Duration::from_millis(100))
    }
}

/// Caller routes bound to `state`.
pub fn caller_routes(state: CallerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/ping-vm", post(ping_vm))
        .route("/callback", post(callback))
        .route("/callbacks", get(callbacks))
        .route("/test-roundtrip", post(test_roundtrip))
        .route("/bulk-test", post(bulk_test))
        .with_state(state)
}

async fn health(State(state): State<CallerState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": state.config.service,
        "revision": state.config.revision,
    }))
}

async fn info(State(state): State<CallerState>) -> Json<Value> {
    let config = &state.config;
    let targets: Map<String, Value> = config
        .targets
        .iter()
        .map(|t| (t.name.clone(), Value::String(t.url.clone())))
        .collect();

    let mut body = json!({
        "service": config.service,
        "revision": config.revision,
        "targets": targets,
        "callback_base_url": config.callback_base_url.clone().unwrap_or_default(),
    });
    for (name, key) in [("a", "vm_a_url"), ("b", "vm_b_url")] {
        if let Some(target) = config.targets.get(name) {
            body[key] = Value::String(target.url.clone());
        }
    }
    Json(body)
}

async fn ping_vm(
    State(state): State<CallerState>,
    body: Bytes,
) -> Result<Json<PingResult>, HarnessError> {
    let request: PingVmRequest = parse_body(&body);
    let target = request.target.as_deref().unwrap_or("a");
    let result = state
        .coordinator
        .ping(
            target,
            request.request_callback.unwrap_or(false),
            request.data.unwrap_or_else(|| json!({})),
        )
        .await?;
    Ok(Json(result))
}

async fn callback(
    State(state): State<CallerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Json<CallbackAck> {
    let payload = parse_value(&body);
    Json(state.callbacks.receive(payload, Some(peer_ip(peer))))
}

async fn callbacks(State(state): State<CallerState>) -> Json<Value> {
    Json(json!({
        "service": state.config.service,
        "callbacks": state.registry.snapshot(),
    }))
}

async fn test_roundtrip(
    State(state): State<CallerState>,
    body: Bytes,
) -> Result<Json<RoundTripResult>, HarnessError> {
    let request: RoundTripRequest = parse_body(&body);
    let target = request.target.as_deref().unwrap_or("a");
    let result = state.coordinator.round_trip(target, request.wait()).await?;
    Ok(Json(result))
}

async fn bulk_test(
    State(state): State<CallerState>,
    body: Bytes,
) -> Result<Json<BulkSummary>, HarnessError> {
    let request: BulkTestRequest = parse_body(&body);
    let count = request.count()?;
    let targets = state
        .coordinator
        .targets()
        .select(request.target.as_deref().unwrap_or("both"))?;
    let summary = state.bulk.run(count, &targets, request.delay()).await;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedTransport;
    use axum::body::{Body, to_bytes};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router(transport: Arc<ScriptedTransport>, config: CallerConfig) -> (Router, CallerState) {
        let state = CallerState::new(config, transport);
        let router = caller_routes(state.clone())
            .layer(MockConnectInfo(SocketAddr::from(([35, 10, 0, 4], 41000))));
        (router, state)
    }

    fn config() -> CallerConfig {
        CallerConfig {
            service: "caller-svc".to_string(),
            revision: "rev-9".to_string(),
            ..Default::default()
        }
    }

    async fn call(router: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let (router, _) = router(Arc::new(ScriptedTransport::new()), config());

        let (status, health) = call(&router, "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["revision"], "rev-9");

        let (_, info) = call(&router, "GET", "/info", "").await;
        assert_eq!(info["vm_a_url"], "http://10.1.0.10:8080");
        assert_eq!(info["targets"]["b"], "http://10.2.0.10:8080");
        assert_eq!(info["callback_base_url"], "");
    }

    #[tokio::test]
    async fn test_callback_records_peer_address() {
        let (router, state) = router(Arc::new(ScriptedTransport::new()), config());

        let (status, ack) = call(
            &router,
            "POST",
            "/callback",
            r#"{"vm_id":"vm-b","correlation_id":"cb-9","original_source_ip":"100.64.0.3","timestamp":1.0}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["status"], "callback_received");
        assert_eq!(ack["correlation_id"], "cb-9");
        assert_eq!(ack["service"], "caller-svc");

        let record = state.registry.get(&"cb-9".into()).unwrap();
        assert_eq!(record.source_ip.as_deref(), Some("35.10.0.4"));

        let (_, listing) = call(&router, "GET", "/callbacks", "").await;
        assert_eq!(listing["callbacks"]["cb-9"]["source_ip"], "35.10.0.4");
    }

    #[tokio::test]
    async fn test_malformed_callback_lands_on_unknown() {
        let (router, state) = router(Arc::new(ScriptedTransport::new()), config());

        let (status, ack) = call(&router, "POST", "/callback", "garbage").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["correlation_id"], "unknown");
        assert!(state.registry.get(&"unknown".into()).is_some());
    }

    #[tokio::test]
    async fn test_ping_vm_unknown_target_is_bad_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let (router, _) = router(transport.clone(), config());

        let (status, body) = call(&router, "POST", "/ping-vm", r#"{"target":"zz"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("zz"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ping_vm_defaults_to_target_a() {
        let transport = Arc::new(ScriptedTransport::new().reply(200, r#"{"source_ip":"100.64.9.9"}"#));
        let (router, _) = router(transport.clone(), config());

        let (status, body) = call(&router, "POST", "/ping-vm", "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target"], "a");
        assert_eq!(body["response"]["source_ip"], "100.64.9.9");
        assert_eq!(transport.calls()[0].url, "http://10.1.0.10:8080/ping");
    }

    #[tokio::test(start_paused = true)]
    async fn test_roundtrip_times_out_without_callback() {
        let transport = Arc::new(ScriptedTransport::new().reply(200, "{}"));
        let config = CallerConfig {
            callback_base_url: Some("https://caller.example".to_string()),
            ..config()
        };
        let (router, _) = router(transport.clone(), config);

        let (_, body) = call(
            &router,
            "POST",
            "/test-roundtrip",
            r#"{"target":"b","wait_for_callback_ms":250}"#,
        )
        .await;

        assert_eq!(body["success"], false);
        assert_eq!(body["phases"]["ping_vm"]["success"], true);
        assert_eq!(body["phases"]["callback"]["elapsed_ms"], 250.0);
        assert_eq!(
            transport.calls()[0].body["callback_url"],
            "https://caller.example/callback"
        );
    }

    #[tokio::test]
    async fn test_bulk_test_both_targets() {
        let transport = Arc::new(ScriptedTransport::new());
        let (router, _) = router(transport.clone(), config());

        let (status, body) = call(
            &router,
            "POST",
            "/bulk-test",
            r#"{"count":2,"target":"both","delay_ms":0}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_requests"], 4);
        assert_eq!(body["successful"], 4);
        assert_eq!(body["service"], "caller-svc");
        assert_eq!(transport.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roundtrip_keeps_target_beside_fractional_wait() {
        let transport = Arc::new(ScriptedTransport::new().reply(200, "{}"));
        let config = CallerConfig {
            callback_base_url: Some("https://caller.example".to_string()),
            ..config()
        };
        let (router, _) = router(transport.clone(), config);

        let (status, body) = call(
            &router,
            "POST",
            "/test-roundtrip",
            r#"{"target":"b","wait_for_callback_ms":2500.5}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(transport.calls()[0].url, "http://10.2.0.10:8080/ping");
        assert_eq!(body["target"], "b");
        assert_eq!(body["phases"]["callback"]["elapsed_ms"], 2500.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roundtrip_malformed_wait_falls_back_alone() {
        let transport = Arc::new(ScriptedTransport::new().reply(200, "{}"));
        let config = CallerConfig {
            callback_base_url: Some("https://caller.example".to_string()),
            ..config()
        };
        let (router, _) = router(transport.clone(), config);

        let (_, body) = call(
            &router,
            "POST",
            "/test-roundtrip",
            r#"{"target":"b","wait_for_callback_ms":"soon"}"#,
        )
        .await;

        assert_eq!(transport.calls()[0].url, "http://10.2.0.10:8080/ping");
        assert_eq!(body["phases"]["callback"]["elapsed_ms"], 5000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_test_negative_delay_keeps_other_fields() {
        let transport = Arc::new(ScriptedTransport::new());
        let (router, _) = router(transport.clone(), config());

        let (status, body) = call(
            &router,
            "POST",
            "/bulk-test",
            r#"{"count":1,"target":"b","delay_ms":-1}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_requests"], 1);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "http://10.2.0.10:8080/ping");
    }

    #[tokio::test]
    async fn test_bulk_test_rejects_oversized_count() {
        let transport = Arc::new(ScriptedTransport::new());
        let (router, state) = router(transport.clone(), config());

        let (status, body) = call(
            &router,
            "POST",
            "/bulk-test",
            r#"{"count":4294967295,"target":"both","delay_ms":0}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("count"));
        assert!(transport.calls().is_empty());

        // The service keeps answering afterwards.
        let (status, _) = call(&router, "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_test_accepts_maximum_count() {
        let transport = Arc::new(ScriptedTransport::new());
        let (router, _) = router(transport.clone(), config());

        let body = format!(r#"{{"count":{MAX_BULK_COUNT},"target":"a","delay_ms":0}}"#);
        let (status, summary) = call(&router, "POST", "/bulk-test", &body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["total_requests"], MAX_BULK_COUNT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_only_with_ttl() {
        let state = CallerState::new(config(), Arc::new(ScriptedTransport::new()));
        assert!(state.spawn_sweeper().is_none());

        let with_ttl = CallerState::new(
            CallerConfig {
                callback_ttl: Some(Duration::from_secs(60)),
                ..config()
            },
            Arc::new(ScriptedTransport::new()),
        );
        let handle = with_ttl.spawn_sweeper().unwrap();
        handle.abort();
    }
}
