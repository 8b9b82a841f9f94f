//! One checkout session: a cart store, its sync worker, the tax
//! gateway, and the step machine, wired together.
//!
//! The session owns the background tasks; dropping it (or calling
//! [`CheckoutSession::complete`]) stops them. A small watcher task feeds
//! every cart snapshot into the step machine so step completion always
//! reflects the current cart.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cartwheel_core::CartKey;
use tokio::task::JoinHandle;

use crate::api::{CartApi, HttpCartApi};
use crate::cart::store::{CartStore, StoreError, SyncWorkerHandle};
use crate::cart::types::TaxLocation;
use crate::config::CheckoutConfig;
use crate::steps::{CheckoutStepMachine, StepInputs};
use crate::tax::{
    HttpTaxApi, TaxApi, TaxTransportError, TaxValidationGateway, TaxValidationOutcome,
};

/// A live checkout session for one billing context.
pub struct CheckoutSession<T: TaxApi> {
    store: CartStore,
    gateway: TaxValidationGateway<T>,
    machine: Arc<Mutex<CheckoutStepMachine>>,
    worker: SyncWorkerHandle,
    steps_watcher: JoinHandle<()>,
}

impl CheckoutSession<HttpTaxApi> {
    /// Open a session against the configured billing backend.
    ///
    /// Must be called from within a tokio runtime (two background tasks
    /// are spawned).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the cart key is empty.
    pub fn connect(
        cart_key: impl Into<CartKey>,
        config: &CheckoutConfig,
    ) -> Result<Self, StoreError> {
        let api = Arc::new(HttpCartApi::new(&config.api));
        let tax_api = HttpTaxApi::new(&config.api);
        Self::with_transports(cart_key, config, api, tax_api)
    }
}

impl<T: TaxApi> CheckoutSession<T> {
    /// Open a session with explicit transports (tests inject fakes here).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the cart key is empty.
    pub fn with_transports<A: CartApi>(
        cart_key: impl Into<CartKey>,
        config: &CheckoutConfig,
        api: Arc<A>,
        tax_api: T,
    ) -> Result<Self, StoreError> {
        let store = CartStore::new(cart_key, config.sync.clone())?;
        let worker = store.spawn_sync_worker(api);
        let gateway = TaxValidationGateway::with_cache_config(tax_api, &config.tax_cache);
        let machine = Arc::new(Mutex::new(CheckoutStepMachine::new()));

        let steps_watcher = tokio::spawn({
            let machine = Arc::clone(&machine);
            let mut snapshots = store.subscribe();
            async move {
                while snapshots.changed().await.is_ok() {
                    let inputs = StepInputs::from_snapshot(&snapshots.borrow_and_update());
                    machine
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .observe(inputs);
                }
            }
        });

        Ok(Self {
            store,
            gateway,
            machine,
            worker,
            steps_watcher,
        })
    }

    /// The cart store (single mutation surface).
    #[must_use]
    pub fn store(&self) -> &CartStore {
        &self.store
    }

    /// The tax validation gateway.
    #[must_use]
    pub fn tax_gateway(&self) -> &TaxValidationGateway<T> {
        &self.gateway
    }

    /// Lock the step machine.
    #[must_use]
    pub fn machine(&self) -> MutexGuard<'_, CheckoutStepMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and attach a tax location to the cart.
    ///
    /// # Errors
    ///
    /// Returns [`TaxTransportError`] when the validation service is
    /// unreachable; field problems come back inside the `Ok` outcome.
    pub async fn set_tax_location(
        &self,
        location: TaxLocation,
    ) -> Result<TaxValidationOutcome, TaxTransportError> {
        self.store.set_tax_location(&self.gateway, location).await
    }

    /// Finish the session: drop staged restorable lines and stop the
    /// background tasks.
    pub fn complete(&self) {
        self.store.clear_restorable_items();
        self.worker.abort();
        self.steps_watcher.abort();
    }
}

impl<T: TaxApi> Drop for CheckoutSession<T> {
    fn drop(&mut self) {
        self.steps_watcher.abort();
        // The sync worker handle aborts itself on drop.
    }
}
