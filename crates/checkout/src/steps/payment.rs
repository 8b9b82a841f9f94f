//! Stored payment methods and constraint filtering.
//!
//! Some purchases restrict which payment methods may be used (business
//! cards only). Filtering must tell the UI *why* the list is empty: an
//! account with no stored methods gets an "add a card" prompt, an
//! account whose methods were all filtered out gets an explanation of
//! the restriction.

use serde::{Deserialize, Serialize};

use crate::cart::types::PaymentConstraint;

/// What kind of stored payment method this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentMethodKind {
    /// A card registered as personal.
    PersonalCard,
    /// A card registered as business.
    BusinessCard,
    /// An external wallet (PayPal or similar).
    Wallet,
}

impl PaymentMethodKind {
    /// Whether this kind satisfies the given constraint.
    #[must_use]
    pub const fn satisfies(&self, constraint: PaymentConstraint) -> bool {
        match constraint {
            PaymentConstraint::Any => true,
            PaymentConstraint::BusinessCardsOnly => matches!(self, Self::BusinessCard),
        }
    }
}

/// A payment method stored on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPaymentMethod {
    /// Backend identifier.
    pub id: String,
    /// Method kind.
    pub kind: PaymentMethodKind,
    /// Display label ("Visa •••• 4242").
    pub display_name: String,
    /// Whether the method has expired and cannot be charged.
    pub expired: bool,
}

/// The selectable subset of stored methods for the current cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredPaymentMethods {
    /// Methods the user may select, in stored order.
    pub methods: Vec<StoredPaymentMethod>,
    /// True when the account *has* usable stored methods but the cart's
    /// constraint filtered every one of them out. Distinguishes "add a
    /// card" from "this purchase needs a business card".
    pub all_filtered_out: bool,
}

impl FilteredPaymentMethods {
    /// Whether a method with this id is selectable.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.methods.iter().any(|m| m.id == id)
    }
}

/// Filter stored methods down to what the cart's constraint allows.
///
/// Expired methods are dropped first and never count toward
/// `all_filtered_out`.
#[must_use]
pub fn filter_payment_methods(
    stored: &[StoredPaymentMethod],
    constraint: PaymentConstraint,
) -> FilteredPaymentMethods {
    let usable: Vec<&StoredPaymentMethod> = stored.iter().filter(|m| !m.expired).collect();
    let methods: Vec<StoredPaymentMethod> = usable
        .iter()
        .filter(|m| m.kind.satisfies(constraint))
        .map(|m| (*m).clone())
        .collect();
    let all_filtered_out = !usable.is_empty() && methods.is_empty();
    FilteredPaymentMethods {
        methods,
        all_filtered_out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(id: &str, kind: PaymentMethodKind, expired: bool) -> StoredPaymentMethod {
        StoredPaymentMethod {
            id: id.to_string(),
            kind,
            display_name: format!("method {id}"),
            expired,
        }
    }

    #[test]
    fn unconstrained_carts_allow_everything_unexpired() {
        let stored = vec![
            method("1", PaymentMethodKind::PersonalCard, false),
            method("2", PaymentMethodKind::Wallet, false),
            method("3", PaymentMethodKind::BusinessCard, true),
        ];
        let filtered = filter_payment_methods(&stored, PaymentConstraint::Any);
        assert_eq!(filtered.methods.len(), 2);
        assert!(!filtered.all_filtered_out);
        assert!(!filtered.contains("3"));
    }

    #[test]
    fn business_constraint_flags_all_filtered_out() {
        let stored = vec![method("1", PaymentMethodKind::PersonalCard, false)];
        let filtered = filter_payment_methods(&stored, PaymentConstraint::BusinessCardsOnly);
        assert!(filtered.methods.is_empty());
        assert!(filtered.all_filtered_out);
    }

    #[test]
    fn no_stored_methods_is_not_filtered_out() {
        let filtered = filter_payment_methods(&[], PaymentConstraint::BusinessCardsOnly);
        assert!(filtered.methods.is_empty());
        assert!(!filtered.all_filtered_out);
    }

    #[test]
    fn only_expired_methods_is_not_filtered_out() {
        let stored = vec![method("1", PaymentMethodKind::BusinessCard, true)];
        let filtered = filter_payment_methods(&stored, PaymentConstraint::BusinessCardsOnly);
        assert!(filtered.methods.is_empty());
        assert!(!filtered.all_filtered_out);
    }

    #[test]
    fn wallets_do_not_satisfy_business_constraint() {
        assert!(!PaymentMethodKind::Wallet.satisfies(PaymentConstraint::BusinessCardsOnly));
        assert!(PaymentMethodKind::Wallet.satisfies(PaymentConstraint::Any));
    }
}
