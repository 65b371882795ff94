//! Outbound HTTP transport.
//!
//! The probe client and the target's callback path only ever need "POST
//! this JSON with a timeout and hand back status plus body". That seam is
//! the [`ProbeTransport`] trait so tests can script replies without a
//! network.

use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error as _;
use std::time::Duration;

/// Raw reply from a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Body as JSON when possible, otherwise as a JSON string.
    pub fn json_or_text(&self) -> Value {
        self.json().unwrap_or_else(|| Value::String(self.body.clone()))
    }
}

/// Client side of an HTTP exchange carrying a JSON body.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        bearer_token: Option<&str>,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// [`ProbeTransport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("nat-probe/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProbeTransport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        bearer_token: Option<&str>,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.post(url).json(body).timeout(timeout);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify(url, timeout, e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| TransportError::Body {
            url: url.to_string(),
            message: error_chain(&e),
        })?;

        Ok(TransportResponse { status, body })
    }
}

fn classify(url: &str, timeout: Duration, err: reqwest::Error) -> TransportError {
    let url = url.to_string();
    if err.is_timeout() {
        TransportError::Timeout { url, timeout }
    } else if err.is_connect() {
        TransportError::Connect {
            url,
            message: error_chain(&err),
        }
    } else {
        TransportError::Request {
            url,
            message: error_chain(&err),
        }
    }
}

/// reqwest's Display hides the underlying cause, which is usually the
/// interesting part (connection refused, DNS failure, ...).
pub(crate) fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
