//! Newtype keys for type-safe entity references.
//!
//! Use the `define_key!` macro to create type-safe string-key wrappers that
//! prevent accidentally mixing keys from different entity types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Macro to define a type-safe string key wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Conversion methods: `new()`, `as_str()`, `into_inner()`
/// - `From<String>`, `From<&str>`, and `Display` implementations
///
/// # Example
///
/// ```rust
/// # use cartwheel_core::define_key;
/// define_key!(CartKey);
/// define_key!(ProductSlug);
///
/// let cart_key = CartKey::new("site:example.com");
/// let slug = ProductSlug::new("business-plan");
///
/// // These are different types, so this won't compile:
/// // let _: CartKey = slug;
/// ```
#[macro_export]
macro_rules! define_key {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new key from anything string-like.
            #[must_use]
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }

            /// Get the underlying string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the key is the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Consume the key and return the underlying `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(key: String) -> Self {
                Self(key)
            }
        }

        impl From<&str> for $name {
            fn from(key: &str) -> Self {
                Self(key.to_string())
            }
        }
    };
}

// Define standard entity keys
define_key!(CartKey);
define_key!(ProductSlug);
define_key!(CouponCode);

impl CouponCode {
    /// Create a coupon code normalized the way the billing backend expects:
    /// surrounding whitespace trimmed, ASCII letters upper-cased.
    #[must_use]
    pub fn normalized(code: &str) -> Self {
        Self::new(code.trim().to_ascii_uppercase())
    }
}

/// Client-generated identity for a cart line item.
///
/// Assigned once when the item first enters a cart and preserved across
/// server round-trips, so the UI can track a line even when the server
/// re-prices or re-orders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemUuid(Uuid);

impl ItemUuid {
    /// Generate a fresh random item identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ItemUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ItemUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ItemUuid> for Uuid {
    fn from(id: ItemUuid) -> Self {
        id.0
    }
}
