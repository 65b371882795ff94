//! Identity tokens for authenticated callbacks.
//!
//! On GCE the target VM fetches an OIDC identity token for the callback
//! URL from the metadata server. Failure is never fatal: the callback goes
//! out without an `Authorization` header instead.

use crate::transport::error_chain;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Metadata endpoint issuing identity tokens for the default service account.
pub const METADATA_IDENTITY_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/identity";

pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Bearer token for `audience`, or `None` if one cannot be obtained.
    async fn identity_token(&self, audience: &str) -> Option<String>;
}

/// Never returns a token. Used off-cloud.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTokenProvider;

#[async_trait]
impl TokenProvider for NoTokenProvider {
    async fn identity_token(&self, _audience: &str) -> Option<String> {
        None
    }
}

/// Fetches identity tokens from the GCE metadata server.
#[derive(Debug, Clone)]
pub struct MetadataTokenProvider {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl MetadataTokenProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_endpoint(client, METADATA_IDENTITY_URL)
    }

    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    async fn identity_token(&self, audience: &str) -> Option<String> {
        let result = self
            .client
            .get(&self.endpoint)
            .query(&[("audience", audience)])
            .header("Metadata-Flavor", "Google")
            .timeout(self.timeout)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to get identity token: {}", error_chain(&e));
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                status = response.status().as_u16(),
                "Metadata server refused identity token request"
            );
            return None;
        }

        match response.text().await {
            Ok(token) if !token.trim().is_empty() => Some(token.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read identity token: {}", error_chain(&e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_token_provider() {
        assert!(NoTokenProvider.identity_token("https://x").await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_metadata_yields_none() {
        let provider =
            MetadataTokenProvider::with_endpoint(reqwest::Client::new(), "http://127.0.0.1:9/identity")
                .timeout(Duration::from_secs(1));
        assert!(provider.identity_token("https://caller/callback").await.is_none());
    }
}
