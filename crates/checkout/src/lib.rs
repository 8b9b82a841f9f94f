//! Cartwheel Checkout - cart synchronization engine and checkout step machine.
//!
//! This crate is the purchase-flow core of the Cartwheel storefront: a
//! client-side mirror of a server-authoritative shopping cart, plus the
//! step machine that gates checkout progression.
//!
//! # Architecture
//!
//! - The server owns pricing, tax, and discounts; this crate never
//!   recomputes them. Every mutation is applied optimistically and then
//!   reconciled against the server's version-stamped cart.
//! - [`cart::CartStore`] is the single mutation surface. Rapid edits are
//!   coalesced by a debounced schedule into at most one in-flight sync
//!   per cart key.
//! - Removed lines are staged in [`cart::RestorableItemRegistry`] for
//!   same-session undo instead of being deleted outright.
//! - [`tax::TaxValidationGateway`] validates billing addresses before
//!   they are attached to a cart; [`steps::CheckoutStepMachine`] consults
//!   both to decide which checkout steps are currently permitted.
//!
//! # Example
//!
//! ```rust,ignore
//! use cartwheel_checkout::config::CheckoutConfig;
//! use cartwheel_checkout::session::CheckoutSession;
//!
//! let config = CheckoutConfig::from_env()?;
//! let session = CheckoutSession::connect("site:example.com", &config)?;
//!
//! session.store().add_items(vec![business_plan()]);
//! let mut snapshots = session.store().subscribe();
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
pub mod config;
pub mod session;
pub mod steps;
pub mod tax;
