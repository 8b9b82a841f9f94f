//! Integration test support for Cartwheel.
//!
//! Provides in-memory fakes for the billing backend ([`FakeCartApi`])
//! and the tax validation service ([`FakeTaxApi`]), plus small helpers
//! shared across the scenario tests in `tests/`.
//!
//! The fakes record every request so tests can assert on coalescing and
//! payload contents, and they price carts from a configurable price
//! book so authoritative totals are deterministic.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::SecretString;
use url::Url;

use cartwheel_checkout::api::types::{
    CouponStatus, ServerCart, ServerLine, ServerMessage, SyncRequest,
};
use cartwheel_checkout::api::{CartApi, CartApiError};
use cartwheel_checkout::cart::types::{
    CartItemInput, CartTotals, PaymentConstraint, ProductKind,
};
use cartwheel_checkout::config::{ApiConfig, CheckoutConfig};
use cartwheel_checkout::tax::{
    TaxApi, TaxCacheConfig, TaxTransportError, TaxValidationRequest, TaxValidationResponse,
    WireFieldError,
};
use cartwheel_core::{CurrencyCode, Money, ProductSlug};

/// Initialize tracing for a test binary (idempotent).
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_test_writer()
        .try_init();
}

/// A dollar amount in cents.
#[must_use]
pub fn usd(cents: i64) -> Money {
    Money::new(Decimal::new(cents, 2), CurrencyCode::USD)
}

/// A plan line input.
#[must_use]
pub fn plan(slug: &str) -> CartItemInput {
    CartItemInput {
        uuid: None,
        product_slug: ProductSlug::new(slug),
        kind: ProductKind::Plan,
        quantity: 1,
        unit_price: usd(2_500),
        is_renewal: false,
        payment_constraint: PaymentConstraint::Any,
    }
}

/// An add-on line input.
#[must_use]
pub fn addon(slug: &str, quantity: u32) -> CartItemInput {
    CartItemInput {
        uuid: None,
        product_slug: ProductSlug::new(slug),
        kind: ProductKind::AddOn,
        quantity,
        unit_price: usd(500),
        is_renewal: false,
        payment_constraint: PaymentConstraint::Any,
    }
}

/// An add-on restricted to business cards.
#[must_use]
pub fn business_addon(slug: &str) -> CartItemInput {
    CartItemInput {
        payment_constraint: PaymentConstraint::BusinessCardsOnly,
        ..addon(slug, 1)
    }
}

/// A domain registration line input.
#[must_use]
pub fn domain(name: &str) -> CartItemInput {
    CartItemInput {
        uuid: None,
        product_slug: ProductSlug::new(name),
        kind: ProductKind::DomainRegistration,
        quantity: 1,
        unit_price: usd(1_500),
        is_renewal: false,
        payment_constraint: PaymentConstraint::Any,
    }
}

/// A checkout config pointing at nothing in particular; tests inject
/// fakes, so the URL is never dialed.
#[must_use]
pub fn test_config() -> CheckoutConfig {
    CheckoutConfig {
        api: ApiConfig {
            base_url: Url::parse("http://billing.test").expect("valid url"),
            api_token: SecretString::from("cw_test_8f4k2m9x7q1z5v3b6n0p".to_string()),
        },
        sync: cartwheel_checkout::cart::SyncPolicy::default(),
        tax_cache: TaxCacheConfig::default(),
    }
}

/// Poll a condition under paused time, auto-advancing until it holds.
///
/// # Panics
///
/// Panics when the condition is still false after ~30 virtual seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..3_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

// =============================================================================
// FakeCartApi
// =============================================================================

struct FakeCartState {
    version: u64,
    requests: Vec<SyncRequest>,
    fail_next: u32,
    price_book: HashMap<String, Money>,
    constraint_book: HashMap<String, PaymentConstraint>,
    valid_coupons: HashMap<String, Money>,
    messages: Vec<ServerMessage>,
    delay: Duration,
}

/// In-memory billing backend: prices carts from a price book, stamps
/// increasing versions, and records every request.
pub struct FakeCartApi {
    state: Mutex<FakeCartState>,
}

impl Default for FakeCartApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCartApi {
    /// A fake with an empty price book (unknown slugs cost $10.00).
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeCartState {
                version: 0,
                requests: Vec::new(),
                fail_next: 0,
                price_book: HashMap::new(),
                constraint_book: HashMap::new(),
                valid_coupons: HashMap::new(),
                messages: Vec::new(),
                delay: Duration::ZERO,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeCartState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the authoritative unit price for a slug.
    #[must_use]
    pub fn with_price(self, slug: &str, unit_price: Money) -> Self {
        self.lock().price_book.insert(slug.to_string(), unit_price);
        self
    }

    /// Set the catalog payment constraint for a slug.
    #[must_use]
    pub fn with_constraint(self, slug: &str, constraint: PaymentConstraint) -> Self {
        self.lock()
            .constraint_book
            .insert(slug.to_string(), constraint);
        self
    }

    /// Register a coupon the server will honor for the given discount.
    #[must_use]
    pub fn with_coupon(self, code: &str, discount: Money) -> Self {
        self.lock()
            .valid_coupons
            .insert(code.to_string(), discount);
        self
    }

    /// Make the next `n` requests fail with a 500.
    pub fn fail_next(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// Add artificial latency to every request.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Attach a cart-level message to subsequent responses.
    pub fn push_message(&self, code: &str, text: &str) {
        self.lock().messages.push(ServerMessage {
            code: Some(code.to_string()),
            text: text.to_string(),
        });
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.lock().requests.clone()
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn price_of(state: &FakeCartState, slug: &str) -> Money {
        state
            .price_book
            .get(slug)
            .copied()
            .unwrap_or_else(|| usd(1_000))
    }

    fn compute(state: &mut FakeCartState, request: &SyncRequest) -> ServerCart {
        state.version += 1;

        let items: Vec<ServerLine> = request
            .items
            .iter()
            .map(|item| {
                let unit_price = Self::price_of(state, item.product_slug.as_str());
                ServerLine {
                    uuid: item.uuid,
                    product_slug: item.product_slug.clone(),
                    kind: item.kind,
                    quantity: item.quantity,
                    unit_price,
                    subtotal: unit_price.times(item.quantity),
                    is_renewal: item.is_renewal,
                    payment_constraint: state
                        .constraint_book
                        .get(item.product_slug.as_str())
                        .copied()
                        .unwrap_or_default(),
                }
            })
            .collect();

        let subtotal = items
            .iter()
            .fold(Money::zero(CurrencyCode::USD), |acc, line| {
                acc.checked_add(&line.subtotal).unwrap_or(acc)
            });

        let mut discount_total = Money::zero(CurrencyCode::USD);
        let coupon_results: Vec<CouponStatus> = request
            .coupons
            .iter()
            .map(|code| match state.valid_coupons.get(code.as_str()) {
                Some(discount) => {
                    discount_total = discount_total
                        .checked_add(discount)
                        .unwrap_or(discount_total);
                    CouponStatus {
                        code: code.clone(),
                        accepted: true,
                        message: None,
                    }
                }
                None => CouponStatus {
                    code: code.clone(),
                    accepted: false,
                    message: Some("This coupon is not valid".to_string()),
                },
            })
            .collect();

        let taxed_base = Money::new(
            subtotal.amount - discount_total.amount,
            CurrencyCode::USD,
        );
        let (tax_total, tax_name) = match &request.tax_location {
            Some(location) => {
                let name = match location.country_code.as_str() {
                    "DE" | "GB" | "FR" => "VAT",
                    "AU" => "GST",
                    _ => "Tax",
                };
                let tax = Money::new(
                    (taxed_base.amount * Decimal::new(10, 2)).round_dp(2),
                    CurrencyCode::USD,
                );
                (Some(tax), Some(name.to_string()))
            }
            None => (None, None),
        };

        let total_amount = taxed_base.amount
            + tax_total.map_or(Decimal::ZERO, |t| t.amount);

        ServerCart {
            cart_key: request.cart_key.clone(),
            version: state.version,
            items,
            totals: CartTotals {
                subtotal,
                discount_total,
                tax_total,
                total: Money::new(total_amount, CurrencyCode::USD),
            },
            tax_name,
            coupon_results,
            messages: state.messages.clone(),
            computed_at: Utc::now(),
        }
    }
}

impl CartApi for FakeCartApi {
    async fn sync_cart(&self, request: SyncRequest) -> Result<ServerCart, CartApiError> {
        // Record at flight start so tests can observe in-flight requests.
        let (delay, fail) = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            let fail = state.fail_next > 0;
            if fail {
                state.fail_next -= 1;
            }
            (state.delay, fail)
        };

        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(CartApiError::Status {
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        Ok(Self::compute(&mut self.lock(), &request))
    }
}

// =============================================================================
// FakeTaxApi
// =============================================================================

/// How the fake tax service behaves.
#[derive(Debug, Clone)]
pub enum TaxBehavior {
    /// Accept everything, reporting the given tax name.
    Accept {
        /// Tax name to report.
        tax_name: Option<String>,
    },
    /// Reject with a postal-code field error.
    RejectPostalCode,
    /// Fail at the transport level.
    Unreachable,
}

/// In-memory tax validation service.
///
/// The call counter is shared so tests keep a handle to it after the
/// fake moves into a gateway.
pub struct FakeTaxApi {
    behavior: Mutex<TaxBehavior>,
    calls: Arc<AtomicU32>,
}

impl FakeTaxApi {
    /// A fake with the given behavior.
    #[must_use]
    pub fn new(behavior: TaxBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Swap the behavior.
    pub fn set_behavior(&self, behavior: TaxBehavior) {
        *self
            .behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Shared handle to the call counter.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }

    /// Number of validation calls received.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TaxApi for FakeTaxApi {
    async fn validate(
        &self,
        request: TaxValidationRequest,
    ) -> Result<TaxValidationResponse, TaxTransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match behavior {
            TaxBehavior::Accept { tax_name } => Ok(TaxValidationResponse {
                success: true,
                normalized: Some(request.location),
                tax_name,
                field_errors: Vec::new(),
            }),
            TaxBehavior::RejectPostalCode => Ok(TaxValidationResponse {
                success: false,
                normalized: None,
                tax_name: None,
                field_errors: vec![WireFieldError {
                    field: "postalCode".to_string(),
                    message: "Unknown postal code".to_string(),
                }],
            }),
            TaxBehavior::Unreachable => Err(TaxTransportError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            }),
        }
    }
}
