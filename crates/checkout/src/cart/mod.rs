//! The cart core: model types, the store, sync scheduling, and the
//! restorable-item registry.
//!
//! # Ownership
//!
//! Each `CartKey` has exactly one mutable owner, its [`CartStore`];
//! everything else reads immutable [`CartSnapshot`]s published through a
//! watch channel. The store's sync worker is the only component that
//! talks to the cart API.

pub mod restorable;
pub mod schedule;
pub mod store;
pub mod types;

pub use restorable::{RestorableItem, RestorableItemRegistry};
pub use schedule::{FailureDisposition, SuccessDisposition, SyncPolicy, SyncSchedule};
pub use store::{CartStore, StoreError, SyncWorkerHandle};
pub use types::{
    CartItem, CartItemInput, CartLineView, CartNotice, CartSnapshot, CartTotals, DesiredCart,
    PaymentConstraint, ProductKind, SyncFailure, TaxLocation,
};
