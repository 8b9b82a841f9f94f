//! `reqwest`-backed tax validation client.

use secrecy::ExposeSecret;
use tracing::instrument;

use crate::config::ApiConfig;

use super::{TaxApi, TaxTransportError, TaxValidationRequest, TaxValidationResponse};

const BODY_SNIPPET_LEN: usize = 500;

/// Client for the billing backend's tax validation endpoint.
#[derive(Clone)]
pub struct HttpTaxApi {
    client: reqwest::Client,
    url: String,
    api_token: secrecy::SecretString,
}

impl HttpTaxApi {
    /// Create a new tax validation client.
    #[must_use]
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!(
                "{}/tax/validate",
                config.base_url.as_str().trim_end_matches('/')
            ),
            api_token: config.api_token.clone(),
        }
    }
}

impl TaxApi for HttpTaxApi {
    #[instrument(skip(self, request), fields(country = %request.location.country_code))]
    async fn validate(
        &self,
        request: TaxValidationRequest,
    ) -> Result<TaxValidationResponse, TaxTransportError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_token.expose_secret())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(TaxTransportError::RateLimited(retry_after));
        }

        let response_text = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %snippet(&response_text),
                "tax validation returned non-success status"
            );
            return Err(TaxTransportError::Status {
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
                    "failed to parse tax validation response"
                );
                Err(TaxTransportError::Parse(e))
            }
        }
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}
