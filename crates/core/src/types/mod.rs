//! Core types for Cartwheel.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod key;
pub mod money;

pub use key::{CartKey, CouponCode, ItemUuid, ProductSlug};
pub use money::{CurrencyCode, Money};
