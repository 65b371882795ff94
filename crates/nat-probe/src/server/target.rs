//! Target server routes.

use super::{parse_value, peer_ip};
use crate::responder::ProbeResponder;
use crate::types::{ProbeResponse, unix_timestamp};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct TargetState {
    pub responder: Arc<ProbeResponder>,
}

impl TargetState {
    pub fn new(responder: ProbeResponder) -> Self {
        Self {
            responder: Arc::new(responder),
        }
    }
}

/// Target routes bound to `state`.
pub fn target_routes(state: TargetState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ping", post(ping))
        .route("/echo", get(echo).post(echo))
        .route("/stats", get(stats))
        .with_state(state)
}

async fn health(State(state): State<TargetState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "vm_id": state.responder.vm_id(),
    }))
}

async fn ping(
    State(state): State<TargetState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Json<ProbeResponse> {
    let payload = parse_value(&body);
    Json(
        state
            .responder
            .handle_ping(payload, Some(peer_ip(peer)))
            .await,
    )
}

async fn echo(
    State(state): State<TargetState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(args): Query<HashMap<String, String>>,
) -> Json<Value> {
    let headers: Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();

    Json(json!({
        "vm_id": state.responder.vm_id(),
        "source_ip": peer_ip(peer),
        "method": method.as_str(),
        "path": uri.path(),
        "headers": headers,
        "args": args,
        "timestamp": unix_timestamp(),
    }))
}

async fn stats(State(state): State<TargetState>) -> Json<Value> {
    Json(json!({
        "vm_id": state.responder.vm_id(),
        "uptime_seconds": state.responder.uptime().as_secs_f64(),
        "timestamp": unix_timestamp(),
    }))
}
