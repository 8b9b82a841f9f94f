//! Tax location validation.
//!
//! A billing address must pass validation before it is attached to a
//! cart; which fields are required varies per country. Obviously
//! incomplete locations are rejected locally by [`rules`] without a
//! round-trip; everything else goes to the validation service behind
//! [`TaxApi`]. Successful validations are cached (`moka`, bounded
//! capacity + TTL) so step navigation does not re-validate an unchanged
//! address.
//!
//! Expected validation failures are data, not errors: they arrive as
//! [`TaxValidationOutcome::Invalid`] so the presentation layer can
//! distinguish "you made a mistake" from "we couldn't reach the server"
//! ([`TaxTransportError`]).

mod http;
pub mod rules;

pub use http::HttpTaxApi;

use std::time::Duration;

use cartwheel_core::ProductSlug;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cart::types::TaxLocation;

const DEFAULT_CACHE_CAPACITY: u64 = 1_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 600;

// =============================================================================
// Outcome Types
// =============================================================================

/// Address field a validation problem refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaxField {
    CountryCode,
    PostalCode,
    Subdivision,
    City,
    Organization,
    /// The server referenced a field this client does not know.
    Unknown,
}

impl TaxField {
    /// Map a wire field name to a known field.
    #[must_use]
    pub fn from_wire(name: &str) -> Self {
        match name {
            "countryCode" => Self::CountryCode,
            "postalCode" => Self::PostalCode,
            "subdivision" => Self::Subdivision,
            "city" => Self::City,
            "organization" => Self::Organization,
            _ => Self::Unknown,
        }
    }
}

/// A field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    /// Which field is wrong.
    pub field: TaxField,
    /// Human-readable explanation.
    pub message: String,
}

/// Result of validating a tax location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaxValidationOutcome {
    /// The location is usable; carry the normalized form forward.
    Valid {
        /// Normalized location (casing, whitespace, canonical codes).
        location: TaxLocation,
        /// Display name of the applicable tax ("VAT", "GST"), when known.
        tax_name: Option<String>,
    },
    /// The location needs fixing before it can be attached to a cart.
    Invalid {
        /// Field-level problems to surface inline.
        errors: Vec<FieldError>,
    },
}

impl TaxValidationOutcome {
    /// Whether the location passed validation.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Errors reaching the validation service.
#[derive(Debug, Error)]
pub enum TaxTransportError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be parsed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Server returned a non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body for diagnostics.
        body: String,
    },

    /// Rate limited by the server.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),
}

// =============================================================================
// Wire Types
// =============================================================================

/// Validation request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxValidationRequest {
    /// The address to validate.
    pub location: TaxLocation,
    /// Domain names in the cart, which affect required fields in some
    /// jurisdictions.
    pub domain_names: Vec<ProductSlug>,
}

/// Per-field message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFieldError {
    /// Wire name of the offending field.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

/// Validation response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxValidationResponse {
    /// Whether the location is usable.
    pub success: bool,
    /// Normalized location, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<TaxLocation>,
    /// Display name of the applicable tax, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_name: Option<String>,
    /// Field-level problems, present on failure.
    #[serde(default)]
    pub field_errors: Vec<WireFieldError>,
}

/// Transport seam for tax validation.
pub trait TaxApi: Send + Sync + 'static {
    /// Validate a location against server-side rules.
    fn validate(
        &self,
        request: TaxValidationRequest,
    ) -> impl Future<Output = Result<TaxValidationResponse, TaxTransportError>> + Send;
}

// =============================================================================
// Gateway
// =============================================================================

/// Cache tuning for validated locations.
#[derive(Debug, Clone)]
pub struct TaxCacheConfig {
    /// Maximum cached validations.
    pub capacity: u64,
    /// How long a validated location stays fresh.
    pub ttl: Duration,
}

impl Default for TaxCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

#[derive(Clone)]
struct CachedValidation {
    location: TaxLocation,
    tax_name: Option<String>,
}

/// Validates tax locations, caching successful results.
pub struct TaxValidationGateway<T> {
    api: T,
    cache: Cache<String, CachedValidation>,
}

impl<T: TaxApi> TaxValidationGateway<T> {
    /// Create a gateway with default cache tuning.
    #[must_use]
    pub fn new(api: T) -> Self {
        Self::with_cache_config(api, &TaxCacheConfig::default())
    }

    /// Create a gateway with explicit cache tuning.
    #[must_use]
    pub fn with_cache_config(api: T, config: &TaxCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(config.ttl)
            .build();
        Self { api, cache }
    }

    /// Validate a location for a cart containing the given domains.
    ///
    /// Field-level problems come back inside `Ok`; only transport
    /// failures are `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`TaxTransportError`] when the validation service is
    /// unreachable or answers unparseably.
    #[instrument(
        skip(self, location, domain_names),
        fields(country = %location.country_code, domains = domain_names.len())
    )]
    pub async fn validate(
        &self,
        location: &TaxLocation,
        domain_names: &[ProductSlug],
    ) -> Result<TaxValidationOutcome, TaxTransportError> {
        // Locally detectable problems never cost a round-trip.
        let errors = rules::check(location);
        if !errors.is_empty() {
            return Ok(TaxValidationOutcome::Invalid { errors });
        }

        let cache_key = cache_key(location, domain_names);
        if let Some(hit) = self.cache.get(&cache_key).await {
            debug!("cache hit for tax validation");
            return Ok(TaxValidationOutcome::Valid {
                location: hit.location,
                tax_name: hit.tax_name,
            });
        }

        let response = self
            .api
            .validate(TaxValidationRequest {
                location: location.clone(),
                domain_names: domain_names.to_vec(),
            })
            .await?;

        if response.success {
            let normalized = response.normalized.unwrap_or_else(|| location.clone());
            self.cache
                .insert(
                    cache_key,
                    CachedValidation {
                        location: normalized.clone(),
                        tax_name: response.tax_name.clone(),
                    },
                )
                .await;
            Ok(TaxValidationOutcome::Valid {
                location: normalized,
                tax_name: response.tax_name,
            })
        } else {
            Ok(TaxValidationOutcome::Invalid {
                errors: response
                    .field_errors
                    .into_iter()
                    .map(|e| FieldError {
                        field: TaxField::from_wire(&e.field),
                        message: e.message,
                    })
                    .collect(),
            })
        }
    }
}

fn cache_key(location: &TaxLocation, domain_names: &[ProductSlug]) -> String {
    let mut domains: Vec<&str> = domain_names.iter().map(ProductSlug::as_str).collect();
    domains.sort_unstable();
    format!(
        "{}|{}|{}|{}|{}|{}",
        location.country_code.trim().to_ascii_uppercase(),
        location.postal_code.as_deref().unwrap_or("-").trim(),
        location.subdivision.as_deref().unwrap_or("-").trim(),
        location.city.as_deref().unwrap_or("-").trim(),
        location.organization.as_deref().unwrap_or("-").trim(),
        domains.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingApi {
        calls: AtomicU32,
        response: TaxValidationResponse,
    }

    impl TaxApi for CountingApi {
        async fn validate(
            &self,
            _request: TaxValidationRequest,
        ) -> Result<TaxValidationResponse, TaxTransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn german_location() -> TaxLocation {
        TaxLocation {
            country_code: "DE".to_string(),
            postal_code: Some("10115".to_string()),
            subdivision: None,
            city: Some("Berlin".to_string()),
            organization: None,
        }
    }

    #[tokio::test]
    async fn valid_locations_are_cached() {
        let api = CountingApi {
            calls: AtomicU32::new(0),
            response: TaxValidationResponse {
                success: true,
                normalized: Some(german_location()),
                tax_name: Some("VAT".to_string()),
                field_errors: Vec::new(),
            },
        };
        let gateway = TaxValidationGateway::new(api);

        let first = gateway
            .validate(&german_location(), &[])
            .await
            .expect("transport ok");
        assert!(first.is_valid());

        let second = gateway
            .validate(&german_location(), &[])
            .await
            .expect("transport ok");
        match second {
            TaxValidationOutcome::Valid { tax_name, .. } => {
                assert_eq!(tax_name.as_deref(), Some("VAT"));
            }
            TaxValidationOutcome::Invalid { .. } => panic!("expected valid"),
        }
        assert_eq!(gateway.api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn local_rules_short_circuit_before_the_network() {
        let api = CountingApi {
            calls: AtomicU32::new(0),
            response: TaxValidationResponse {
                success: true,
                normalized: None,
                tax_name: None,
                field_errors: Vec::new(),
            },
        };
        let gateway = TaxValidationGateway::new(api);

        let missing_postal = TaxLocation {
            country_code: "US".to_string(),
            postal_code: None,
            subdivision: None,
            city: None,
            organization: None,
        };
        let outcome = gateway
            .validate(&missing_postal, &[])
            .await
            .expect("transport ok");
        assert!(!outcome.is_valid());
        assert_eq!(gateway.api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn server_rejections_map_to_field_errors() {
        let api = CountingApi {
            calls: AtomicU32::new(0),
            response: TaxValidationResponse {
                success: false,
                normalized: None,
                tax_name: None,
                field_errors: vec![
                    WireFieldError {
                        field: "postalCode".to_string(),
                        message: "Unknown postal code".to_string(),
                    },
                    WireFieldError {
                        field: "somethingNew".to_string(),
                        message: "?".to_string(),
                    },
                ],
            },
        };
        let gateway = TaxValidationGateway::new(api);

        let outcome = gateway
            .validate(&german_location(), &[])
            .await
            .expect("transport ok");
        let TaxValidationOutcome::Invalid { errors } = outcome else {
            panic!("expected invalid");
        };
        assert_eq!(errors[0].field, TaxField::PostalCode);
        assert_eq!(errors[1].field, TaxField::Unknown);
    }

    #[test]
    fn cache_key_is_stable_across_domain_order() {
        let loc = german_location();
        let a = cache_key(&loc, &[ProductSlug::new("b.com"), ProductSlug::new("a.com")]);
        let b = cache_key(&loc, &[ProductSlug::new("a.com"), ProductSlug::new("b.com")]);
        assert_eq!(a, b);
    }
}
