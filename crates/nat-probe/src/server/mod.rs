//! HTTP surfaces for the caller and target services.
//!
//! # Caller
//!
//! - `GET  /health`          - liveness
//! - `GET  /info`            - service identity and configured targets
//! - `POST /ping-vm`         - single probe, optional callback solicitation
//! - `POST /callback`        - callback receipt from targets
//! - `GET  /callbacks`       - every callback received so far
//! - `POST /test-roundtrip`  - probe plus bounded wait for the callback
//! - `POST /bulk-test`       - sequential probe run with summary statistics,
//!   at most [`MAX_BULK_COUNT`] iterations
//!
//! # Target
//!
//! - `GET  /health`          - liveness
//! - `POST /ping`            - probe receipt, optional callback
//! - `GET|POST /echo`        - reflect the request back
//! - `GET  /stats`           - uptime
//!
//! Request bodies that are missing or not JSON are treated as `{}`. Within
//! an object body each field falls back to its default on its own, so one
//! malformed field never discards the others.

mod caller;
mod target;

pub use caller::{CallerState, MAX_BULK_COUNT, caller_routes};
pub use target::{TargetState, target_routes};

use crate::error::HarnessError;
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

impl IntoResponse for HarnessError {
    fn into_response(self) -> Response {
        let status = match self {
            HarnessError::UnknownTarget(_)
            | HarnessError::NoTargets
            | HarnessError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Decode a JSON body, falling back to `T::default()` when it is empty or
/// does not parse.
pub(crate) fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    if body.is_empty() {
        return T::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        debug!("Ignoring unparseable request body: {}", e);
        T::default()
    })
}

/// Field deserializer that yields `None` when the value has the wrong shape.
///
/// Use with `#[serde(default, deserialize_with = "lenient")]` on `Option`
/// fields.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Milliseconds as sent by clients (integer or fractional) to a `Duration`.
/// Negative, non-finite and out-of-range values are rejected.
pub(crate) fn millis(ms: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(ms / 1000.0).ok()
}

/// Decode a free-form JSON body, `{}` when absent or invalid.
pub(crate) fn parse_value(body: &Bytes) -> Value {
    let value: Option<Value> = parse_body(body);
    value.unwrap_or_else(|| json!({}))
}

/// Peer IP as seen on the accepted connection.
pub(crate) fn peer_ip(peer: SocketAddr) -> String {
    peer.ip().to_canonical().to_string()
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    router: Router,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, router: Router) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_with_shutdown(listener, router, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await
}
