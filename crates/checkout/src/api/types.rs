//! Wire types for the server cart API.
//!
//! Request/response envelopes for `POST /carts/{cartKey}/sync`. The
//! server is authoritative for every monetary field here; the client
//! only echoes desired items and reads back the computed cart.

use cartwheel_core::{CartKey, CouponCode, ItemUuid, Money, ProductSlug};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cart::types::{CartItem, CartTotals, PaymentConstraint, ProductKind, TaxLocation};

// =============================================================================
// Request
// =============================================================================

/// A desired line as sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedItem {
    /// Client-generated line identity.
    pub uuid: ItemUuid,
    /// Catalog product slug.
    pub product_slug: ProductSlug,
    /// Product kind.
    pub kind: ProductKind,
    /// Desired quantity.
    pub quantity: u32,
    /// Whether this line renews an existing subscription.
    pub is_renewal: bool,
}

impl From<&CartItem> for RequestedItem {
    fn from(item: &CartItem) -> Self {
        Self {
            uuid: item.uuid,
            product_slug: item.product_slug.clone(),
            kind: item.kind,
            quantity: item.quantity,
            is_renewal: item.is_renewal,
        }
    }
}

/// Full desired-state sync request.
///
/// The request always carries the complete desired cart, never a diff,
/// so a superseded response can be discarded without replay bookkeeping
/// on the server side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// The billing context being synced.
    pub cart_key: CartKey,
    /// Last authoritative version the client has seen (0 if none).
    pub client_version: u64,
    /// Desired line items.
    pub items: Vec<RequestedItem>,
    /// Desired tax location, when validated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_location: Option<TaxLocation>,
    /// Desired coupon codes.
    pub coupons: Vec<CouponCode>,
}

// =============================================================================
// Response
// =============================================================================

/// An authoritative line as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLine {
    /// Echoed client line identity.
    pub uuid: ItemUuid,
    /// Catalog product slug.
    pub product_slug: ProductSlug,
    /// Product kind.
    pub kind: ProductKind,
    /// Honored quantity.
    pub quantity: u32,
    /// Authoritative per-unit price.
    pub unit_price: Money,
    /// Authoritative line subtotal.
    pub subtotal: Money,
    /// Whether this line renews an existing subscription.
    pub is_renewal: bool,
    /// Payment-method restriction the catalog imposes for this line.
    #[serde(default)]
    pub payment_constraint: PaymentConstraint,
}

/// Per-coupon acceptance result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponStatus {
    /// The submitted code.
    pub code: CouponCode,
    /// Whether the server honored it.
    pub accepted: bool,
    /// Explanation when rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Free-form cart-level message from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Machine-readable code, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable text.
    pub text: String,
}

/// The authoritative cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCart {
    /// Echoed billing context key.
    pub cart_key: CartKey,
    /// Monotonic version stamped by the server; starts at 1.
    pub version: u64,
    /// Authoritative lines.
    pub items: Vec<ServerLine>,
    /// Computed cost summary.
    pub totals: CartTotals,
    /// Display name of the applicable tax ("VAT", "GST"), when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_name: Option<String>,
    /// Per-coupon acceptance results.
    #[serde(default)]
    pub coupon_results: Vec<CouponStatus>,
    /// Cart-level messages (re-pricing, dropped lines, ...).
    #[serde(default)]
    pub messages: Vec<ServerMessage>,
    /// Server-side computation timestamp.
    pub computed_at: DateTime<Utc>,
}
