//! The cart store: single mutation surface over the optimistic cart.
//!
//! Every mutation is applied to the desired state synchronously and
//! published before any network traffic happens; a worker task owned by
//! the session reconciles against the server in the background. The
//! store keeps "what the user asked for" (`DesiredCart`) separate from
//! "what the server confirmed" (`ServerCart`) and merges the two into
//! each published [`CartSnapshot`].
//!
//! # Conflict resolution
//!
//! Responses carrying a `version` at or below the confirmed one are
//! discarded. Newer responses are adopted; if mutations were issued
//! after the request was sent (`mutation_seq` moved past `sent_seq`),
//! the desired state already folds them in and is left untouched — the
//! immediate follow-up sync replays them on top of the new baseline.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cartwheel_core::{CartKey, CouponCode, ItemUuid, ProductSlug};
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::api::types::{RequestedItem, ServerCart, ServerLine, SyncRequest};
use crate::api::{CartApi, CartApiError};
use crate::tax::{TaxApi, TaxTransportError, TaxValidationGateway, TaxValidationOutcome};

use super::restorable::{RestorableItem, RestorableItemRegistry};
use super::schedule::{FailureDisposition, SyncPolicy, SyncSchedule};
use super::types::{
    CartItem, CartItemInput, CartLineView, CartNotice, CartSnapshot, DesiredCart, ProductKind,
    SyncFailure, TaxLocation,
};

/// Errors from store construction.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Carts are keyed by billing context; an empty key has none.
    #[error("cart key must not be empty")]
    EmptyCartKey,
}

// =============================================================================
// CartStore
// =============================================================================

/// Owner of one cart's optimistic-plus-authoritative state.
///
/// Cheaply cloneable via `Arc`; clones share the same cart. Carts with
/// different keys are fully independent — create one store per key and
/// inject it, rather than looking a cart up ambiently.
#[derive(Clone)]
pub struct CartStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    cart_key: CartKey,
    state: Mutex<StoreState>,
    snapshot_tx: watch::Sender<CartSnapshot>,
    wake: Notify,
}

struct StoreState {
    desired: DesiredCart,
    confirmed: Option<ServerCart>,
    /// Bumped on every mutation; the replay policy compares it against
    /// the seq captured when a request was sent.
    mutation_seq: u64,
    /// `mutation_seq` at the moment the in-flight request was built.
    sent_seq: u64,
    schedule: SyncSchedule,
    restorable: RestorableItemRegistry,
    sync_failure: Option<SyncFailure>,
    notices: Vec<CartNotice>,
    /// Display tax name from gateway validation, used until the server
    /// confirms one.
    tax_name_hint: Option<String>,
    /// Whether the worker already published an overdue snapshot for the
    /// current pending stretch.
    overdue_noted: bool,
}

impl CartStore {
    /// Create an empty cart for the given billing context.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyCartKey`] when the key is empty.
    pub fn new(cart_key: impl Into<CartKey>, policy: SyncPolicy) -> Result<Self, StoreError> {
        let cart_key = cart_key.into();
        if cart_key.is_empty() {
            return Err(StoreError::EmptyCartKey);
        }

        let (snapshot_tx, _) = watch::channel(CartSnapshot::empty(cart_key.clone()));
        Ok(Self {
            inner: Arc::new(StoreInner {
                cart_key,
                state: Mutex::new(StoreState {
                    desired: DesiredCart::default(),
                    confirmed: None,
                    mutation_seq: 0,
                    sent_seq: 0,
                    schedule: SyncSchedule::new(policy),
                    restorable: RestorableItemRegistry::new(),
                    sync_failure: None,
                    notices: Vec::new(),
                    tax_name_hint: None,
                    overdue_noted: false,
                }),
                snapshot_tx,
                wake: Notify::new(),
            }),
        })
    }

    /// The billing context this store owns.
    #[must_use]
    pub fn cart_key(&self) -> &CartKey {
        &self.inner.cart_key
    }

    /// Subscribe to snapshot updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add items to the cart, merging idempotently.
    ///
    /// Exclusive kinds (plans) replace any existing line of the same
    /// kind; re-adding the same product otherwise replaces that line
    /// while keeping its uuid, so adding a product twice never yields
    /// two lines.
    pub fn add_items(&self, items: Vec<CartItemInput>) {
        if items.is_empty() {
            return;
        }
        let now = now_instant();
        let mut state = self.inner.lock_state();
        for input in items {
            merge_item(&mut state.desired.items, input.into_item());
        }
        self.inner.note_mutation(&mut state, now);
    }

    /// Remove a line, staging it for same-session restore.
    ///
    /// Removing an unknown uuid is a no-op and returns `false`.
    pub fn remove_item(&self, uuid: ItemUuid) -> bool {
        let now = now_instant();
        let mut state = self.inner.lock_state();
        let Some(index) = state.desired.items.iter().position(|i| i.uuid == uuid) else {
            return false;
        };
        let item = state.desired.items.remove(index);
        if !state.restorable.stage_at(item, now) {
            warn!(cart_key = %self.inner.cart_key, %uuid, "line already staged for restore");
        }
        self.inner.note_mutation(&mut state, now);
        true
    }

    /// Update a line's quantity; zero behaves as [`Self::remove_item`].
    ///
    /// An unknown uuid is a no-op and returns `false`.
    pub fn update_quantity(&self, uuid: ItemUuid, quantity: u32) -> bool {
        if quantity == 0 {
            return self.remove_item(uuid);
        }
        let now = now_instant();
        let mut state = self.inner.lock_state();
        let Some(item) = state.desired.items.iter_mut().find(|i| i.uuid == uuid) else {
            return false;
        };
        if item.quantity == quantity {
            return true;
        }
        item.quantity = quantity;
        self.inner.note_mutation(&mut state, now);
        true
    }

    /// Apply a coupon code (normalized). Duplicate codes are a no-op.
    ///
    /// Acceptance is decided server-side; a rejection comes back as a
    /// [`CartNotice::CouponRejected`] on the snapshot, never an error.
    pub fn apply_coupon(&self, code: &str) -> bool {
        let code = CouponCode::normalized(code);
        if code.is_empty() {
            return false;
        }
        let now = now_instant();
        let mut state = self.inner.lock_state();
        if state.desired.coupons.contains(&code) {
            return false;
        }
        state.desired.coupons.push(code);
        self.inner.note_mutation(&mut state, now);
        true
    }

    /// Remove a coupon code. Absent codes are a no-op.
    pub fn remove_coupon(&self, code: &str) -> bool {
        let code = CouponCode::normalized(code);
        let now = now_instant();
        let mut state = self.inner.lock_state();
        let before = state.desired.coupons.len();
        state.desired.coupons.retain(|c| c != &code);
        if state.desired.coupons.len() == before {
            return false;
        }
        self.inner.note_mutation(&mut state, now);
        true
    }

    /// Set the cart's tax location.
    ///
    /// The pending location is stored and published immediately, but a
    /// sync is only triggered once the gateway validates it — an address
    /// the server would reject never generates cart traffic. Field-level
    /// problems come back inside the `Ok` outcome; only transport
    /// failures are errors.
    ///
    /// # Errors
    ///
    /// Returns [`TaxTransportError`] when the validation service is
    /// unreachable.
    #[instrument(skip(self, gateway, location), fields(cart_key = %self.inner.cart_key))]
    pub async fn set_tax_location<T: TaxApi>(
        &self,
        gateway: &TaxValidationGateway<T>,
        location: TaxLocation,
    ) -> Result<TaxValidationOutcome, TaxTransportError> {
        let domain_names = {
            let mut state = self.inner.lock_state();
            state.desired.tax_location = Some(location.clone());
            state.desired.tax_location_validated = false;
            let now = now_instant();
            self.inner.publish(&state, now);
            state
                .desired
                .items
                .iter()
                .filter(|item| item.kind == ProductKind::DomainRegistration)
                .map(|item| item.product_slug.clone())
                .collect::<Vec<ProductSlug>>()
        };

        let outcome = gateway.validate(&location, &domain_names).await?;

        if let TaxValidationOutcome::Valid {
            location: normalized,
            tax_name,
        } = &outcome
        {
            let now = now_instant();
            let mut state = self.inner.lock_state();
            state.desired.tax_location = Some(normalized.clone());
            state.desired.tax_location_validated = true;
            state.tax_name_hint = tax_name.clone();
            self.inner.note_mutation(&mut state, now);
        }

        Ok(outcome)
    }

    /// Restore a previously removed line.
    ///
    /// The line leaves the registry before it is re-added, so a
    /// concurrent second restore of the same uuid finds nothing. The
    /// re-add goes through [`Self::add_items`], which re-triggers
    /// recalculation — the old price is not assumed current.
    pub fn restore_item(&self, uuid: ItemUuid) -> bool {
        let taken = {
            let mut state = self.inner.lock_state();
            state.restorable.take(uuid)
        };
        match taken {
            Some(item) => {
                self.add_items(vec![item.into()]);
                true
            }
            None => false,
        }
    }

    /// Lines currently staged for restore, in removal order.
    #[must_use]
    pub fn restorable_items(&self) -> Vec<CartItem> {
        let state = self.inner.lock_state();
        state
            .restorable
            .items()
            .iter()
            .map(|entry: &RestorableItem| entry.item.clone())
            .collect()
    }

    /// How long a staged line has been removed, or `None` if not staged.
    #[must_use]
    pub fn restorable_age(&self, uuid: ItemUuid) -> Option<Duration> {
        let state = self.inner.lock_state();
        state.restorable.age_at(uuid, now_instant())
    }

    /// Drop all staged lines (checkout completion or session teardown).
    pub fn clear_restorable_items(&self) {
        let mut state = self.inner.lock_state();
        state.restorable.clear();
    }

    /// Dismiss a surfaced sync failure notice.
    pub fn dismiss_sync_failure(&self) {
        let mut state = self.inner.lock_state();
        if state.sync_failure.take().is_some() {
            self.inner.publish(&state, now_instant());
        }
    }

    // =========================================================================
    // Sync worker
    // =========================================================================

    /// Spawn the background task that reconciles this cart against the
    /// server. Dropping the returned handle aborts the task.
    #[must_use]
    pub fn spawn_sync_worker<A: CartApi>(&self, api: Arc<A>) -> SyncWorkerHandle {
        let inner = Arc::clone(&self.inner);
        SyncWorkerHandle {
            join: tokio::spawn(run_sync_worker(inner, api)),
        }
    }

    #[cfg(test)]
    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock_state()
    }
}

impl StoreInner {
    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        // A poisoned lock still holds consistent cart state; keep going.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a mutation: bump the seq, restart the debounce window,
    /// publish the new optimistic snapshot, and wake the worker.
    fn note_mutation(&self, state: &mut StoreState, now: Instant) {
        state.mutation_seq += 1;
        state.schedule.note_mutation_at(now);
        state.overdue_noted = false;
        self.publish(state, now);
        self.wake.notify_one();
    }

    fn publish(&self, state: &StoreState, now: Instant) {
        self.snapshot_tx
            .send_replace(state.build_snapshot(&self.cart_key, now));
    }
}

// =============================================================================
// State transitions
// =============================================================================

impl StoreState {
    /// Merge a server response in, honoring the version check and the
    /// replay policy.
    fn apply_server_cart(&mut self, cart: ServerCart, now: Instant) {
        let current_version = self.confirmed.as_ref().map_or(0, |c| c.version);
        if cart.version <= current_version {
            // Stale: superseded by a newer response we already hold.
            debug!(
                stale_version = cart.version,
                current_version, "discarding stale sync response"
            );
            self.schedule.complete_success_at(now);
            return;
        }

        self.notices = derive_notices(&cart);

        // Codes the server declined stay out of the desired list; the
        // notice explains why they vanished.
        let rejected: HashSet<&CouponCode> = cart
            .coupon_results
            .iter()
            .filter(|status| !status.accepted)
            .map(|status| &status.code)
            .collect();
        if !rejected.is_empty() {
            self.desired.coupons.retain(|code| !rejected.contains(code));
        }

        if self.mutation_seq == self.sent_seq {
            // Nothing newer locally: adopt the authoritative cart as the
            // new desired baseline.
            self.desired.items = cart.items.iter().map(server_line_to_item).collect();
        }
        // Otherwise the desired state already folds in the newer intents;
        // leaving it untouched replays them over the new baseline via the
        // follow-up sync.

        self.sync_failure = None;
        self.overdue_noted = false;
        self.confirmed = Some(cart);
        self.schedule.complete_success_at(now);
    }

    /// Record a failed round-trip, surfacing a `SyncFailure` once the
    /// retry budget is spent. The optimistic state is never rolled back.
    fn apply_sync_error(&mut self, err: &CartApiError, now: Instant) {
        let disposition = match err {
            CartApiError::RateLimited(seconds) => self
                .schedule
                .complete_rate_limited_at(now, Duration::from_secs(*seconds)),
            _ => self.schedule.complete_failure_at(now),
        };
        match disposition {
            FailureDisposition::Retry(at) => {
                warn!(
                    error = %err,
                    attempt = self.schedule.attempts(),
                    retry_in_ms = at.saturating_duration_since(now).as_millis(),
                    "cart sync failed; retrying"
                );
            }
            FailureDisposition::Exhausted { attempts } => {
                error!(error = %err, attempts, "cart sync failed; retries exhausted");
                self.sync_failure = Some(SyncFailure {
                    attempts,
                    message: err.to_string(),
                });
            }
        }
    }

    fn build_request(&self, cart_key: &CartKey) -> SyncRequest {
        SyncRequest {
            cart_key: cart_key.clone(),
            client_version: self.confirmed.as_ref().map_or(0, |c| c.version),
            items: self.desired.items.iter().map(RequestedItem::from).collect(),
            tax_location: if self.desired.tax_location_validated {
                self.desired.tax_location.clone()
            } else {
                None
            },
            coupons: self.desired.coupons.clone(),
        }
    }

    fn build_snapshot(&self, cart_key: &CartKey, now: Instant) -> CartSnapshot {
        let confirmed = self.confirmed.as_ref();
        let items = self
            .desired
            .items
            .iter()
            .map(|item| {
                let confirmed_line = confirmed.and_then(|cart| {
                    cart.items.iter().find(|line| {
                        line.uuid == item.uuid
                            && line.product_slug == item.product_slug
                            && line.quantity == item.quantity
                    })
                });
                match confirmed_line {
                    Some(line) => CartLineView {
                        uuid: item.uuid,
                        product_slug: item.product_slug.clone(),
                        kind: item.kind,
                        quantity: item.quantity,
                        unit_price: line.unit_price,
                        subtotal: line.subtotal,
                        is_renewal: item.is_renewal,
                        is_pending: false,
                    },
                    None => CartLineView {
                        uuid: item.uuid,
                        product_slug: item.product_slug.clone(),
                        kind: item.kind,
                        quantity: item.quantity,
                        unit_price: item.unit_price,
                        subtotal: item.subtotal(),
                        is_renewal: item.is_renewal,
                        is_pending: true,
                    },
                }
            })
            .collect();

        CartSnapshot {
            cart_key: cart_key.clone(),
            version: confirmed.map_or(0, |c| c.version),
            items,
            coupons: self.desired.coupons.clone(),
            tax_location: self.desired.tax_location.clone(),
            tax_location_validated: self.desired.tax_location_validated,
            tax_name: confirmed
                .and_then(|c| c.tax_name.clone())
                .or_else(|| self.tax_name_hint.clone()),
            totals: confirmed.map(|c| c.totals.clone()),
            payment_constraint: self.desired.payment_constraint(),
            is_pending_recalculation: self.schedule.is_pending(),
            recalculation_overdue: self.schedule.is_overdue_at(now),
            sync_failure: self.sync_failure.clone(),
            notices: self.notices.clone(),
        }
    }
}

/// Merge one item into the desired lines.
///
/// Exclusive kinds keep at most one line of that kind; otherwise the
/// same product (kind + slug) replaces its existing line, keeping the
/// original uuid so the UI tracks it as the same row.
fn merge_item(items: &mut Vec<CartItem>, mut item: CartItem) {
    let existing = if item.kind.is_exclusive() {
        items.iter_mut().find(|i| i.kind == item.kind)
    } else {
        items
            .iter_mut()
            .find(|i| i.kind == item.kind && i.product_slug == item.product_slug)
    };
    match existing {
        Some(slot) => {
            if slot.product_slug == item.product_slug {
                item.uuid = slot.uuid;
            }
            *slot = item;
        }
        None => items.push(item),
    }
}

fn server_line_to_item(line: &ServerLine) -> CartItem {
    CartItem {
        uuid: line.uuid,
        product_slug: line.product_slug.clone(),
        kind: line.kind,
        quantity: line.quantity,
        unit_price: line.unit_price,
        is_renewal: line.is_renewal,
        payment_constraint: line.payment_constraint,
    }
}

fn derive_notices(cart: &ServerCart) -> Vec<CartNotice> {
    cart.coupon_results
        .iter()
        .filter(|status| !status.accepted)
        .map(|status| CartNotice::CouponRejected {
            code: status.code.clone(),
            message: status.message.clone(),
        })
        .chain(cart.messages.iter().map(|msg| CartNotice::ServerMessage {
            code: msg.code.clone(),
            text: msg.text.clone(),
        }))
        .collect()
}

/// Clock source for the store and worker.
///
/// Goes through tokio's clock so paused-time tests control scheduling;
/// outside a test runtime this is plain wall time.
fn now_instant() -> Instant {
    tokio::time::Instant::now().into_std()
}

// =============================================================================
// Worker
// =============================================================================

/// Handle to a spawned sync worker. Aborts the task on drop.
pub struct SyncWorkerHandle {
    join: JoinHandle<()>,
}

impl SyncWorkerHandle {
    /// Stop the worker. In-flight transport work is dropped; the store's
    /// optimistic state is untouched.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Whether the worker task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for SyncWorkerHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

async fn run_sync_worker<A: CartApi>(inner: Arc<StoreInner>, api: Arc<A>) {
    loop {
        let now = now_instant();
        let wake_at = {
            let state = inner.lock_state();
            let sync_at = state.schedule.next_deadline();
            let overdue_at = if state.overdue_noted {
                None
            } else {
                state.schedule.overdue_at()
            };
            match (sync_at, overdue_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (deadline, None) | (None, deadline) => deadline,
            }
        };

        match wake_at {
            None => inner.wake.notified().await,
            Some(at) if at > now => {
                tokio::select! {
                    () = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                    () = inner.wake.notified() => {}
                }
            }
            Some(_) => {
                let now = now_instant();

                // Surface the overdue flag once per pending stretch.
                {
                    let mut state = inner.lock_state();
                    if !state.overdue_noted && state.schedule.is_overdue_at(now) {
                        state.overdue_noted = true;
                        warn!(cart_key = %inner.cart_key, "cart recalculation overdue");
                        inner.publish(&state, now);
                    }
                }

                let (request, timeout) = {
                    let mut state = inner.lock_state();
                    if !state.schedule.start_in_flight_at(now) {
                        // A newer mutation pushed the deadline out.
                        continue;
                    }
                    state.sent_seq = state.mutation_seq;
                    (
                        state.build_request(&inner.cart_key),
                        state.schedule.policy().request_timeout,
                    )
                };

                debug!(
                    cart_key = %inner.cart_key,
                    items = request.items.len(),
                    client_version = request.client_version,
                    "starting cart sync"
                );

                let outcome = match tokio::time::timeout(timeout, api.sync_cart(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(CartApiError::Timeout(timeout.as_secs())),
                };

                let now = now_instant();
                let mut state = inner.lock_state();
                match outcome {
                    Ok(cart) => state.apply_server_cart(cart, now),
                    Err(err) => state.apply_sync_error(&err, now),
                }
                inner.publish(&state, now);
            }
        }
    }
}
