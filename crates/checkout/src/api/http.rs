//! `reqwest`-backed cart API client.

use secrecy::ExposeSecret;
use tracing::instrument;

use crate::config::ApiConfig;

use super::types::{ServerCart, SyncRequest};
use super::{CartApi, CartApiError};

/// Truncation bound for response bodies echoed into logs and errors.
const BODY_SNIPPET_LEN: usize = 500;

/// Client for the billing backend's cart endpoints.
#[derive(Clone)]
pub struct HttpCartApi {
    client: reqwest::Client,
    base_url: String,
    api_token: secrecy::SecretString,
}

impl HttpCartApi {
    /// Create a new cart API client.
    #[must_use]
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, CartApiError>
    where
        B: serde::Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_token.expose_secret())
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();

        // Check for rate limiting
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(CartApiError::RateLimited(retry_after));
        }

        // Get response body as text first for better error diagnostics
        let response_text = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %snippet(&response_text),
                "cart API returned non-success status"
            );
            return Err(CartApiError::Status {
                status: status.as_u16(),
                body: snippet(&response_text),
            });
        }

        match serde_json::from_str(&response_text) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    body = %snippet(&response_text),
                    "failed to parse cart API response"
                );
                Err(CartApiError::Parse(e))
            }
        }
    }
}

impl CartApi for HttpCartApi {
    #[instrument(
        skip(self, request),
        fields(cart_key = %request.cart_key, client_version = request.client_version)
    )]
    async fn sync_cart(&self, request: SyncRequest) -> Result<ServerCart, CartApiError> {
        let path = format!("/carts/{}/sync", request.cart_key);
        self.post_json(&path, &request).await
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_truncates_long_bodies() {
        let long = "x".repeat(2000);
        assert_eq!(snippet(&long).len(), BODY_SNIPPET_LEN);
        assert_eq!(snippet("short"), "short");
    }
}
