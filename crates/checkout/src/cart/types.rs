//! Domain types for the cart core.
//!
//! These types carry no behavior beyond trivial derivations (line
//! subtotals, constraint folding); all pricing authority stays with the
//! server.

use cartwheel_core::{CartKey, CouponCode, CurrencyCode, ItemUuid, Money, ProductSlug};
use serde::{Deserialize, Serialize};

// =============================================================================
// Product Types
// =============================================================================

/// What kind of purchasable unit a cart line is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductKind {
    /// A hosting plan. At most one per cart; adding another replaces it.
    Plan,
    /// A domain name registration.
    DomainRegistration,
    /// A mailbox subscription.
    Email,
    /// Any other add-on product.
    AddOn,
}

impl ProductKind {
    /// Whether more than one line of this kind may coexist in a cart.
    ///
    /// A cart carries exactly one plan; everything else is limited per
    /// product slug instead (the same domain cannot be registered twice,
    /// but two different domains can).
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        matches!(self, Self::Plan)
    }
}

/// Which payment methods a purchase allows.
///
/// Folding two constraints keeps the stricter one, so a cart's effective
/// constraint is the fold over its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentConstraint {
    /// Any stored payment method may be used.
    #[default]
    Any,
    /// Only cards registered as business cards may be used.
    BusinessCardsOnly,
}

impl PaymentConstraint {
    /// Combine with another constraint, keeping the stricter of the two.
    #[must_use]
    pub const fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Any, Self::Any) => Self::Any,
            _ => Self::BusinessCardsOnly,
        }
    }
}

// =============================================================================
// Cart Items
// =============================================================================

/// A line item in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Client-generated identity, stable across server round-trips.
    pub uuid: ItemUuid,
    /// Catalog product slug.
    pub product_slug: ProductSlug,
    /// Product kind.
    pub kind: ProductKind,
    /// Quantity.
    pub quantity: u32,
    /// Per-unit price as last known to the client.
    pub unit_price: Money,
    /// Whether this line renews an existing subscription.
    pub is_renewal: bool,
    /// Payment-method restriction this purchase imposes.
    #[serde(default)]
    pub payment_constraint: PaymentConstraint,
}

impl CartItem {
    /// Optimistic line subtotal (`unit_price * quantity`).
    ///
    /// Authoritative subtotals come from the server; this is only what
    /// the UI shows while a recalculation is pending.
    #[must_use]
    pub fn subtotal(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// Input for adding a line to the cart.
///
/// The `uuid` is optional; the store assigns a fresh one when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemInput {
    /// Existing identity to preserve (restores), or `None` for new lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<ItemUuid>,
    /// Catalog product slug.
    pub product_slug: ProductSlug,
    /// Product kind.
    pub kind: ProductKind,
    /// Quantity.
    pub quantity: u32,
    /// Per-unit price from the catalog.
    pub unit_price: Money,
    /// Whether this line renews an existing subscription.
    #[serde(default)]
    pub is_renewal: bool,
    /// Payment-method restriction this purchase imposes.
    #[serde(default)]
    pub payment_constraint: PaymentConstraint,
}

impl CartItemInput {
    /// Materialize into a [`CartItem`], assigning a fresh uuid if absent.
    #[must_use]
    pub fn into_item(self) -> CartItem {
        CartItem {
            uuid: self.uuid.unwrap_or_else(ItemUuid::generate),
            product_slug: self.product_slug,
            kind: self.kind,
            quantity: self.quantity,
            unit_price: self.unit_price,
            is_renewal: self.is_renewal,
            payment_constraint: self.payment_constraint,
        }
    }
}

impl From<CartItem> for CartItemInput {
    fn from(item: CartItem) -> Self {
        Self {
            uuid: Some(item.uuid),
            product_slug: item.product_slug,
            kind: item.kind,
            quantity: item.quantity,
            unit_price: item.unit_price,
            is_renewal: item.is_renewal,
            payment_constraint: item.payment_constraint,
        }
    }
}

// =============================================================================
// Tax Location
// =============================================================================

/// Billing address fields needed for tax computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxLocation {
    /// ISO 3166-1 alpha-2 country code.
    pub country_code: String,
    /// Postal code, required in some countries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    /// State/province/region, required in some countries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdivision: Option<String>,
    /// City.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Organization name or VAT identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

// =============================================================================
// Totals & Notices
// =============================================================================

/// Server-computed cart cost summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    /// Sum of line subtotals before discounts and tax.
    pub subtotal: Money,
    /// Total discount from accepted coupons.
    pub discount_total: Money,
    /// Tax amount; `None` until a validated tax location is attached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_total: Option<Money>,
    /// Amount due.
    pub total: Money,
}

impl CartTotals {
    /// Zeroed totals in the given currency.
    #[must_use]
    pub const fn zero(currency: CurrencyCode) -> Self {
        Self {
            subtotal: Money::zero(currency),
            discount_total: Money::zero(currency),
            tax_total: None,
            total: Money::zero(currency),
        }
    }
}

/// Cart-level notice surfaced to the UI.
///
/// Notices are data, not errors: a rejected coupon is an expected
/// outcome reported by the server, not a failure of the sync machinery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum CartNotice {
    /// The server declined a coupon code.
    CouponRejected {
        /// The rejected code.
        code: CouponCode,
        /// Server-provided explanation, when present.
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A free-form message attached to the cart by the server
    /// (e.g. a line was re-priced or an unavailable product dropped).
    ServerMessage {
        /// Machine-readable message code, when present.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Human-readable text.
        text: String,
    },
}

/// Rendered record of an exhausted sync attempt.
///
/// Transport errors are not `Clone`, so the snapshot carries this
/// flattened form instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    /// How many attempts were made before giving up.
    pub attempts: u32,
    /// Display-ready description of the last error.
    pub message: String,
}

// =============================================================================
// Desired State
// =============================================================================

/// What the user has asked for: the fold of every mutation intent issued
/// this session. Never contains server-derived data except where a
/// confirmed cart has been adopted as the new baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredCart {
    /// Line items in issue order.
    pub items: Vec<CartItem>,
    /// Pending tax location, if any.
    pub tax_location: Option<TaxLocation>,
    /// Whether the pending tax location passed gateway validation.
    pub tax_location_validated: bool,
    /// Applied coupon codes in issue order.
    pub coupons: Vec<CouponCode>,
}

impl DesiredCart {
    /// Effective payment constraint across all items.
    #[must_use]
    pub fn payment_constraint(&self) -> PaymentConstraint {
        self.items
            .iter()
            .fold(PaymentConstraint::Any, |acc, item| {
                acc.and(item.payment_constraint)
            })
    }
}

// =============================================================================
// Snapshot (presentation contract)
// =============================================================================

/// Per-line display data for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    /// Line identity.
    pub uuid: ItemUuid,
    /// Catalog product slug.
    pub product_slug: ProductSlug,
    /// Product kind.
    pub kind: ProductKind,
    /// Quantity.
    pub quantity: u32,
    /// Per-unit price (authoritative when `is_pending` is false).
    pub unit_price: Money,
    /// Line subtotal (authoritative when `is_pending` is false).
    pub subtotal: Money,
    /// Whether this line renews an existing subscription.
    pub is_renewal: bool,
    /// True while this line differs from the last confirmed cart.
    pub is_pending: bool,
}

/// Immutable view of the cart published to subscribers.
///
/// This is the only cart state the presentation layer sees; it is
/// re-published in full on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    /// The billing context this cart belongs to.
    pub cart_key: CartKey,
    /// Last authoritative version; 0 before the first successful sync.
    pub version: u64,
    /// Lines in issue order.
    pub items: Vec<CartLineView>,
    /// Applied coupon codes.
    pub coupons: Vec<CouponCode>,
    /// Current tax location, validated or not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_location: Option<TaxLocation>,
    /// Whether the tax location passed gateway validation.
    pub tax_location_validated: bool,
    /// Display name of the applicable tax ("VAT", "GST"), from the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_name: Option<String>,
    /// Authoritative totals; `None` until the first successful sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<CartTotals>,
    /// Effective payment-method restriction for the current item mix.
    pub payment_constraint: PaymentConstraint,
    /// True while local mutations await server confirmation.
    pub is_pending_recalculation: bool,
    /// True once confirmation has been outstanding past the configured
    /// pending timeout.
    pub recalculation_overdue: bool,
    /// Set when sync retries were exhausted; dismissible, and cleared by
    /// the next successful sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_failure: Option<SyncFailure>,
    /// Cart-level notices from the last authoritative response.
    pub notices: Vec<CartNotice>,
}

impl CartSnapshot {
    /// An empty snapshot for a freshly created cart.
    #[must_use]
    pub fn empty(cart_key: CartKey) -> Self {
        Self {
            cart_key,
            version: 0,
            items: Vec::new(),
            coupons: Vec::new(),
            tax_location: None,
            tax_location_validated: false,
            tax_name: None,
            totals: None,
            payment_constraint: PaymentConstraint::Any,
            is_pending_recalculation: false,
            recalculation_overdue: false,
            sync_failure: None,
            notices: Vec::new(),
        }
    }

    /// Total item quantity across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|line| line.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn item(slug: &str, kind: ProductKind, constraint: PaymentConstraint) -> CartItem {
        CartItem {
            uuid: ItemUuid::generate(),
            product_slug: ProductSlug::new(slug),
            kind,
            quantity: 1,
            unit_price: Money::new(Decimal::new(1000, 2), CurrencyCode::USD),
            is_renewal: false,
            payment_constraint: constraint,
        }
    }

    #[test]
    fn test_constraint_fold_keeps_strictest() {
        let mut desired = DesiredCart::default();
        desired
            .items
            .push(item("personal-plan", ProductKind::Plan, PaymentConstraint::Any));
        assert_eq!(desired.payment_constraint(), PaymentConstraint::Any);

        desired.items.push(item(
            "agency-bundle",
            ProductKind::AddOn,
            PaymentConstraint::BusinessCardsOnly,
        ));
        assert_eq!(
            desired.payment_constraint(),
            PaymentConstraint::BusinessCardsOnly
        );
    }

    #[test]
    fn test_only_plans_are_exclusive() {
        assert!(ProductKind::Plan.is_exclusive());
        assert!(!ProductKind::DomainRegistration.is_exclusive());
        assert!(!ProductKind::Email.is_exclusive());
        assert!(!ProductKind::AddOn.is_exclusive());
    }

    #[test]
    fn test_input_materialization_assigns_uuid_once() {
        let input = CartItemInput {
            uuid: None,
            product_slug: ProductSlug::new("example.com"),
            kind: ProductKind::DomainRegistration,
            quantity: 1,
            unit_price: Money::new(Decimal::new(1500, 2), CurrencyCode::USD),
            is_renewal: false,
            payment_constraint: PaymentConstraint::Any,
        };
        let item = input.into_item();

        let round_trip = CartItemInput::from(item.clone()).into_item();
        assert_eq!(round_trip.uuid, item.uuid);
    }

    #[test]
    fn test_snapshot_item_count() {
        let mut snapshot = CartSnapshot::empty(CartKey::new("site:1"));
        assert_eq!(snapshot.item_count(), 0);

        snapshot.items.push(CartLineView {
            uuid: ItemUuid::generate(),
            product_slug: ProductSlug::new("mailbox"),
            kind: ProductKind::Email,
            quantity: 3,
            unit_price: Money::new(Decimal::new(350, 2), CurrencyCode::USD),
            subtotal: Money::new(Decimal::new(1050, 2), CurrencyCode::USD),
            is_renewal: false,
            is_pending: true,
        });
        assert_eq!(snapshot.item_count(), 3);
    }

    #[test]
    fn test_notice_serialization_is_tagged() {
        let notice = CartNotice::CouponRejected {
            code: CouponCode::new("EXPIRED10"),
            message: Some("This coupon has expired".to_string()),
        };
        let json = serde_json::to_value(&notice).expect("serialize");
        assert_eq!(json["kind"], "couponRejected");
        assert_eq!(json["code"], "EXPIRED10");
    }
}
