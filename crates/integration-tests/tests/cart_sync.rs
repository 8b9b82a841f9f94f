//! End-to-end cart synchronization scenarios against the in-memory
//! billing backend.
//!
//! All tests run under paused tokio time: debounce windows and backoff
//! delays elapse virtually, so the scenarios are deterministic and fast.

use std::sync::Arc;
use std::time::Duration;

use cartwheel_checkout::cart::{CartStore, SyncPolicy};
use cartwheel_integration_tests::{FakeCartApi, addon, domain, init_tracing, usd, wait_until};

fn store() -> CartStore {
    CartStore::new("site:integration", SyncPolicy::default()).expect("valid key")
}

#[tokio::test(start_paused = true)]
async fn five_rapid_updates_produce_one_sync_request() {
    init_tracing();
    let api = Arc::new(FakeCartApi::new().with_price("backup", usd(500)));
    let store = store();
    let _worker = store.spawn_sync_worker(Arc::clone(&api));

    store.add_items(vec![addon("backup", 1)]);
    let uuid = store.snapshot().items[0].uuid;
    for quantity in 2..=5 {
        tokio::time::advance(Duration::from_millis(20)).await;
        store.update_quantity(uuid, quantity);
    }

    wait_until("cart settles", || {
        !store.snapshot().is_pending_recalculation
    })
    .await;

    assert_eq!(api.request_count(), 1);
    let request = api.requests().remove(0);
    assert_eq!(request.items.len(), 1);
    assert_eq!(request.items[0].quantity, 5);

    // Authoritative pricing replaced the optimistic numbers.
    let snapshot = store.snapshot();
    assert_eq!(snapshot.version, 1);
    assert!(!snapshot.items[0].is_pending);
    assert_eq!(snapshot.totals.expect("totals").subtotal, usd(2_500));
}

#[tokio::test(start_paused = true)]
async fn mutation_during_flight_supersedes_and_follows_up() {
    init_tracing();
    let api = Arc::new(FakeCartApi::new());
    api.set_delay(Duration::from_millis(200));
    let store = store();
    let _worker = store.spawn_sync_worker(Arc::clone(&api));

    // Mutation A goes out after the debounce window.
    store.add_items(vec![addon("backup", 1)]);
    wait_until("first request in flight", || api.request_count() == 1).await;

    // Mutation B lands while A's request is in flight.
    store.add_items(vec![domain("example.com")]);

    wait_until("cart settles with both mutations", || {
        let snapshot = store.snapshot();
        !snapshot.is_pending_recalculation && snapshot.items.len() == 2
    })
    .await;

    // Exactly one follow-up, carrying the full latest state.
    assert_eq!(api.request_count(), 2);
    let requests = api.requests();
    assert_eq!(requests[0].items.len(), 1);
    assert_eq!(requests[1].items.len(), 2);

    // Effects apply in issue order: A then B.
    let snapshot = store.snapshot();
    let slugs: Vec<&str> = snapshot
        .items
        .iter()
        .map(|line| line.product_slug.as_str())
        .collect();
    assert_eq!(slugs, vec!["backup", "example.com"]);
    assert_eq!(snapshot.version, 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_and_eventually_succeed() {
    init_tracing();
    let api = Arc::new(FakeCartApi::new());
    api.fail_next(2);
    let store = store();
    let _worker = store.spawn_sync_worker(Arc::clone(&api));

    store.add_items(vec![addon("backup", 1)]);

    wait_until("cart settles after retries", || {
        !store.snapshot().is_pending_recalculation
    })
    .await;

    // Two failures, one success; the user never saw an error.
    assert_eq!(api.request_count(), 3);
    let snapshot = store.snapshot();
    assert!(snapshot.sync_failure.is_none());
    assert_eq!(snapshot.version, 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_without_losing_edits() {
    init_tracing();
    let api = Arc::new(FakeCartApi::new());
    api.fail_next(99);
    let store = store();
    let _worker = store.spawn_sync_worker(Arc::clone(&api));

    store.add_items(vec![addon("backup", 2)]);

    wait_until("sync failure surfaces", || {
        store.snapshot().sync_failure.is_some()
    })
    .await;

    let snapshot = store.snapshot();
    assert_eq!(snapshot.sync_failure.expect("failure").attempts, 3);
    assert_eq!(api.request_count(), 3);
    // The optimistic cart is preserved, still flagged as pending.
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(snapshot.items[0].quantity, 2);
    assert!(snapshot.is_pending_recalculation);

    // The next mutation re-arms the schedule and heals the cart.
    api.fail_next(0);
    store.apply_coupon("SAVE10");
    wait_until("cart heals", || {
        let snapshot = store.snapshot();
        !snapshot.is_pending_recalculation && snapshot.sync_failure.is_none()
    })
    .await;
    assert_eq!(store.snapshot().version, 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_coupon_is_a_notice_not_an_error() {
    init_tracing();
    let api = Arc::new(FakeCartApi::new().with_coupon("SAVE10", usd(1_000)));
    let store = store();
    let _worker = store.spawn_sync_worker(Arc::clone(&api));

    store.add_items(vec![addon("backup", 1)]);
    store.apply_coupon("SAVE10");
    store.apply_coupon("EXPIRED10");

    wait_until("cart settles", || {
        !store.snapshot().is_pending_recalculation
    })
    .await;

    let snapshot = store.snapshot();
    // The honored coupon stays; the rejected one is gone with a notice.
    assert_eq!(snapshot.coupons.len(), 1);
    assert_eq!(snapshot.coupons[0].as_str(), "SAVE10");
    assert_eq!(snapshot.notices.len(), 1);
    assert!(snapshot.sync_failure.is_none());
    assert_eq!(snapshot.totals.expect("totals").discount_total, usd(1_000));
}

#[tokio::test(start_paused = true)]
async fn remove_and_restore_recalculates_via_the_server() {
    init_tracing();
    let api = Arc::new(FakeCartApi::new().with_price("example.com", usd(1_800)));
    let store = store();
    let _worker = store.spawn_sync_worker(Arc::clone(&api));

    store.add_items(vec![addon("backup", 1), domain("example.com")]);
    wait_until("cart settles", || {
        !store.snapshot().is_pending_recalculation
    })
    .await;

    let uuid = store
        .snapshot()
        .items
        .iter()
        .find(|line| line.product_slug.as_str() == "example.com")
        .expect("domain line")
        .uuid;

    assert!(store.remove_item(uuid));
    wait_until("removal confirmed", || {
        let snapshot = store.snapshot();
        !snapshot.is_pending_recalculation && snapshot.items.len() == 1
    })
    .await;
    assert_eq!(store.restorable_items().len(), 1);

    assert!(store.restore_item(uuid));
    wait_until("restore confirmed", || {
        let snapshot = store.snapshot();
        !snapshot.is_pending_recalculation && snapshot.items.len() == 2
    })
    .await;

    // Same item set as before the removal, re-priced by the server.
    let snapshot = store.snapshot();
    let restored = snapshot
        .items
        .iter()
        .find(|line| line.uuid == uuid)
        .expect("restored line");
    assert_eq!(restored.unit_price, usd(1_800));
    assert!(store.restorable_items().is_empty());
}

#[tokio::test(start_paused = true)]
async fn independent_carts_sync_independently() {
    init_tracing();
    let api_a = Arc::new(FakeCartApi::new());
    let api_b = Arc::new(FakeCartApi::new());
    let store_a = CartStore::new("site:a", SyncPolicy::default()).expect("valid key");
    let store_b = CartStore::new("site:b", SyncPolicy::default()).expect("valid key");
    let _worker_a = store_a.spawn_sync_worker(Arc::clone(&api_a));
    let _worker_b = store_b.spawn_sync_worker(Arc::clone(&api_b));

    store_a.add_items(vec![addon("backup", 1)]);
    store_b.add_items(vec![domain("example.org")]);

    wait_until("both carts settle", || {
        !store_a.snapshot().is_pending_recalculation
            && !store_b.snapshot().is_pending_recalculation
    })
    .await;

    assert_eq!(api_a.request_count(), 1);
    assert_eq!(api_b.request_count(), 1);
    assert_eq!(store_a.snapshot().items[0].product_slug.as_str(), "backup");
    assert_eq!(
        store_b.snapshot().items[0].product_slug.as_str(),
        "example.org"
    );
}
