//! The checkout step machine.
//!
//! An ordered sequence of steps with pure completion predicates.
//! [`CheckoutStepMachine::make_step_active`] is the only way the active
//! step changes, and it refuses to skip past an incomplete step, so the
//! presentation layer cannot race its way into payment before the
//! contact form is done.
//!
//! Completion is derived from a [`StepInputs`] value built out of the
//! current cart snapshot plus the machine's own payment selection; the
//! machine never reads ambient state.

pub mod payment;

pub use payment::{
    FilteredPaymentMethods, PaymentMethodKind, StoredPaymentMethod, filter_payment_methods,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cart::types::{CartSnapshot, PaymentConstraint};

/// Checkout steps in flow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckoutStepId {
    /// Contact and tax information.
    ContactForm,
    /// Payment method selection.
    PaymentMethod,
    /// Review and submit.
    Review,
}

/// The canonical step order.
const STEP_ORDER: [CheckoutStepId; 3] = [
    CheckoutStepId::ContactForm,
    CheckoutStepId::PaymentMethod,
    CheckoutStepId::Review,
];

fn step_index(step: CheckoutStepId) -> usize {
    match step {
        CheckoutStepId::ContactForm => 0,
        CheckoutStepId::PaymentMethod => 1,
        CheckoutStepId::Review => 2,
    }
}

/// Where the session is in the submit lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionPhase {
    /// Steps may change and be edited.
    Editing,
    /// A payment submission is in progress.
    Submitting,
    /// The order went through; the machine is finished.
    Submitted,
}

/// Errors from submission transitions.
#[derive(Debug, Error)]
pub enum StepError {
    /// Submission is only possible from the review step.
    #[error("submission requires the review step to be active")]
    NotOnReviewStep,

    /// A step before review is still incomplete.
    #[error("step {0:?} is not complete")]
    StepIncomplete(CheckoutStepId),

    /// A submission is already in progress or finished.
    #[error("submission already {0:?}")]
    WrongPhase(SubmissionPhase),
}

/// Everything the completion predicates need, snapshotted from the
/// cart. Build with [`StepInputs::from_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInputs {
    /// Whether the cart has at least one line.
    pub has_items: bool,
    /// Whether the tax location passed gateway validation.
    pub tax_location_validated: bool,
    /// The cart's effective payment-method restriction.
    pub payment_constraint: PaymentConstraint,
}

impl StepInputs {
    /// Derive the step inputs from a cart snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &CartSnapshot) -> Self {
        Self {
            has_items: !snapshot.items.is_empty(),
            tax_location_validated: snapshot.tax_location_validated,
            payment_constraint: snapshot.payment_constraint,
        }
    }

    /// Inputs for an empty, untouched cart.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            has_items: false,
            tax_location_validated: false,
            payment_constraint: PaymentConstraint::Any,
        }
    }
}

/// Per-step derived state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    /// Which step.
    pub id: CheckoutStepId,
    /// Whether the step's completion predicate currently holds.
    pub is_complete: bool,
    /// Whether `make_step_active` would accept this step right now.
    pub is_enabled: bool,
}

/// The machine's published state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutStepState {
    /// The single active step.
    pub active: CheckoutStepId,
    /// Submit lifecycle phase.
    pub phase: SubmissionPhase,
    /// Derived status per step, in flow order.
    pub steps: Vec<StepStatus>,
    /// True when stored methods exist but the cart's constraint
    /// filtered all of them out.
    pub payment_methods_all_filtered_out: bool,
}

// =============================================================================
// Machine
// =============================================================================

/// Finite state machine over the checkout steps.
pub struct CheckoutStepMachine {
    active: CheckoutStepId,
    phase: SubmissionPhase,
    inputs: StepInputs,
    stored_methods: Vec<StoredPaymentMethod>,
    selected_method: Option<String>,
    state_tx: watch::Sender<CheckoutStepState>,
}

impl CheckoutStepMachine {
    /// Create a machine at the contact step with empty inputs.
    #[must_use]
    pub fn new() -> Self {
        let mut machine = Self {
            active: CheckoutStepId::ContactForm,
            phase: SubmissionPhase::Editing,
            inputs: StepInputs::empty(),
            stored_methods: Vec::new(),
            selected_method: None,
            state_tx: watch::channel(CheckoutStepState {
                active: CheckoutStepId::ContactForm,
                phase: SubmissionPhase::Editing,
                steps: Vec::new(),
                payment_methods_all_filtered_out: false,
            })
            .0,
        };
        machine.publish();
        machine
    }

    /// Subscribe to step-state updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CheckoutStepState> {
        self.state_tx.subscribe()
    }

    /// The latest published state.
    #[must_use]
    pub fn state(&self) -> CheckoutStepState {
        self.state_tx.borrow().clone()
    }

    /// Feed the machine fresh inputs derived from the cart.
    pub fn observe(&mut self, inputs: StepInputs) {
        if self.inputs != inputs {
            self.inputs = inputs;
            self.publish();
        }
    }

    /// Replace the account's stored payment methods.
    pub fn set_stored_methods(&mut self, methods: Vec<StoredPaymentMethod>) {
        self.stored_methods = methods;
        // A selection that no longer exists is meaningless.
        if let Some(selected) = &self.selected_method
            && !self.stored_methods.iter().any(|m| &m.id == selected)
        {
            self.selected_method = None;
        }
        self.publish();
    }

    /// Select a payment method by id.
    ///
    /// Returns `false` (selection unchanged) when the id is not in the
    /// currently selectable set.
    pub fn select_payment_method(&mut self, id: &str) -> bool {
        if !self.filtered_methods().contains(id) {
            warn!(method = id, "rejected selection of unavailable payment method");
            return false;
        }
        self.selected_method = Some(id.to_string());
        self.publish();
        true
    }

    /// The currently selected method id, if any.
    #[must_use]
    pub fn selected_method(&self) -> Option<&str> {
        self.selected_method.as_deref()
    }

    /// The selectable methods for the current cart constraint.
    #[must_use]
    pub fn filtered_methods(&self) -> FilteredPaymentMethods {
        filter_payment_methods(&self.stored_methods, self.inputs.payment_constraint)
    }

    /// Whether a step's completion predicate currently holds.
    #[must_use]
    pub fn is_step_complete(&self, step: CheckoutStepId) -> bool {
        match step {
            CheckoutStepId::ContactForm => {
                self.inputs.has_items && self.inputs.tax_location_validated
            }
            CheckoutStepId::PaymentMethod => self
                .selected_method
                .as_deref()
                .is_some_and(|id| self.filtered_methods().contains(id)),
            CheckoutStepId::Review => self.phase == SubmissionPhase::Submitted,
        }
    }

    /// Activate a step.
    ///
    /// Succeeds only while editing and only when every step before the
    /// target is complete; otherwise the call is a no-op and the current
    /// active step is retained.
    pub fn make_step_active(&mut self, step: CheckoutStepId) -> bool {
        if self.phase != SubmissionPhase::Editing {
            debug!(?step, phase = ?self.phase, "step change rejected after submission started");
            return false;
        }
        if !self.is_step_enabled(step) {
            debug!(?step, "step change rejected by gating");
            return false;
        }
        if self.active != step {
            self.active = step;
            self.publish();
        }
        true
    }

    /// Begin payment submission from the review step.
    ///
    /// # Errors
    ///
    /// Returns [`StepError`] when not on review, when a prior step is
    /// incomplete, or when a submission already started.
    pub fn begin_submission(&mut self) -> Result<(), StepError> {
        if self.phase != SubmissionPhase::Editing {
            return Err(StepError::WrongPhase(self.phase));
        }
        if self.active != CheckoutStepId::Review {
            return Err(StepError::NotOnReviewStep);
        }
        for step in &STEP_ORDER[..step_index(CheckoutStepId::Review)] {
            if !self.is_step_complete(*step) {
                return Err(StepError::StepIncomplete(*step));
            }
        }
        self.phase = SubmissionPhase::Submitting;
        info!("payment submission started");
        self.publish();
        Ok(())
    }

    /// Record a failed payment attempt.
    ///
    /// Terminal for the attempt only: the machine returns to the
    /// payment-method step with everything else intact.
    pub fn record_payment_failure(&mut self) {
        if self.phase != SubmissionPhase::Submitting {
            return;
        }
        warn!("payment submission failed; returning to payment method step");
        self.phase = SubmissionPhase::Editing;
        self.active = CheckoutStepId::PaymentMethod;
        self.publish();
    }

    /// Record a successful payment. The machine is finished afterwards;
    /// no further step changes are accepted.
    pub fn record_payment_success(&mut self) {
        if self.phase != SubmissionPhase::Submitting {
            return;
        }
        info!("payment submission succeeded");
        self.phase = SubmissionPhase::Submitted;
        self.publish();
    }

    /// Whether `make_step_active` would accept this step.
    fn is_step_enabled(&self, step: CheckoutStepId) -> bool {
        STEP_ORDER[..step_index(step)]
            .iter()
            .all(|prior| self.is_step_complete(*prior))
    }

    fn publish(&mut self) {
        let steps = STEP_ORDER
            .iter()
            .map(|&id| StepStatus {
                id,
                is_complete: self.is_step_complete(id),
                is_enabled: self.phase == SubmissionPhase::Editing && self.is_step_enabled(id),
            })
            .collect();
        self.state_tx.send_replace(CheckoutStepState {
            active: self.active,
            phase: self.phase,
            steps,
            payment_methods_all_filtered_out: self.filtered_methods().all_filtered_out,
        });
    }
}

impl Default for CheckoutStepMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_inputs() -> StepInputs {
        StepInputs {
            has_items: true,
            tax_location_validated: true,
            payment_constraint: PaymentConstraint::Any,
        }
    }

    fn business_card() -> StoredPaymentMethod {
        StoredPaymentMethod {
            id: "pm-1".to_string(),
            kind: PaymentMethodKind::BusinessCard,
            display_name: "Visa •••• 4242".to_string(),
            expired: false,
        }
    }

    fn personal_card() -> StoredPaymentMethod {
        StoredPaymentMethod {
            id: "pm-2".to_string(),
            kind: PaymentMethodKind::PersonalCard,
            display_name: "Amex •••• 0005".to_string(),
            expired: false,
        }
    }

    #[test]
    fn cannot_skip_past_incomplete_contact_step() {
        let mut machine = CheckoutStepMachine::new();
        assert!(!machine.make_step_active(CheckoutStepId::PaymentMethod));
        assert_eq!(machine.state().active, CheckoutStepId::ContactForm);
    }

    #[test]
    fn completing_steps_unlocks_the_next() {
        let mut machine = CheckoutStepMachine::new();
        machine.observe(ready_inputs());
        machine.set_stored_methods(vec![business_card()]);

        assert!(machine.make_step_active(CheckoutStepId::PaymentMethod));
        // Review stays gated until a method is selected.
        assert!(!machine.make_step_active(CheckoutStepId::Review));

        assert!(machine.select_payment_method("pm-1"));
        assert!(machine.make_step_active(CheckoutStepId::Review));
        assert_eq!(machine.state().active, CheckoutStepId::Review);
    }

    #[test]
    fn going_back_is_always_allowed_while_editing() {
        let mut machine = CheckoutStepMachine::new();
        machine.observe(ready_inputs());
        machine.set_stored_methods(vec![business_card()]);
        machine.select_payment_method("pm-1");
        machine.make_step_active(CheckoutStepId::Review);

        assert!(machine.make_step_active(CheckoutStepId::ContactForm));
        assert_eq!(machine.state().active, CheckoutStepId::ContactForm);
    }

    #[test]
    fn business_only_cart_with_personal_card_reports_the_restriction() {
        let mut machine = CheckoutStepMachine::new();
        machine.observe(StepInputs {
            has_items: true,
            tax_location_validated: true,
            payment_constraint: PaymentConstraint::BusinessCardsOnly,
        });
        machine.set_stored_methods(vec![personal_card()]);

        assert!(!machine.is_step_complete(CheckoutStepId::PaymentMethod));
        let state = machine.state();
        assert!(state.payment_methods_all_filtered_out);
        // The personal card is not selectable at all.
        assert!(!machine.select_payment_method("pm-2"));
    }

    #[test]
    fn constraint_change_invalidates_a_now_incompatible_selection() {
        let mut machine = CheckoutStepMachine::new();
        machine.observe(ready_inputs());
        machine.set_stored_methods(vec![personal_card()]);
        assert!(machine.select_payment_method("pm-2"));
        assert!(machine.is_step_complete(CheckoutStepId::PaymentMethod));

        // A business-only item lands in the cart.
        machine.observe(StepInputs {
            payment_constraint: PaymentConstraint::BusinessCardsOnly,
            ..ready_inputs()
        });
        assert!(!machine.is_step_complete(CheckoutStepId::PaymentMethod));
        assert!(machine.state().payment_methods_all_filtered_out);
    }

    #[test]
    fn submission_lifecycle_failure_returns_to_payment_step() {
        let mut machine = CheckoutStepMachine::new();
        machine.observe(ready_inputs());
        machine.set_stored_methods(vec![business_card()]);
        machine.select_payment_method("pm-1");
        machine.make_step_active(CheckoutStepId::Review);

        machine.begin_submission().expect("all steps complete");
        // No step changes while submitting.
        assert!(!machine.make_step_active(CheckoutStepId::ContactForm));

        machine.record_payment_failure();
        let state = machine.state();
        assert_eq!(state.phase, SubmissionPhase::Editing);
        assert_eq!(state.active, CheckoutStepId::PaymentMethod);
        // Contact/tax progress survives the failed attempt.
        assert!(machine.is_step_complete(CheckoutStepId::ContactForm));
    }

    #[test]
    fn submitted_machine_accepts_no_more_transitions() {
        let mut machine = CheckoutStepMachine::new();
        machine.observe(ready_inputs());
        machine.set_stored_methods(vec![business_card()]);
        machine.select_payment_method("pm-1");
        machine.make_step_active(CheckoutStepId::Review);
        machine.begin_submission().expect("all steps complete");
        machine.record_payment_success();

        assert_eq!(machine.state().phase, SubmissionPhase::Submitted);
        assert!(machine.is_step_complete(CheckoutStepId::Review));
        assert!(!machine.make_step_active(CheckoutStepId::ContactForm));
        assert!(matches!(
            machine.begin_submission(),
            Err(StepError::WrongPhase(SubmissionPhase::Submitted))
        ));
    }

    #[test]
    fn submission_requires_review_step() {
        let mut machine = CheckoutStepMachine::new();
        machine.observe(ready_inputs());
        machine.set_stored_methods(vec![business_card()]);
        machine.select_payment_method("pm-1");

        assert!(matches!(
            machine.begin_submission(),
            Err(StepError::NotOnReviewStep)
        ));
    }

    #[test]
    fn step_ids_serialize_kebab_case() {
        let json = serde_json::to_value(CheckoutStepId::ContactForm).expect("serialize");
        assert_eq!(json, "contact-form");
        let json = serde_json::to_value(CheckoutStepId::PaymentMethod).expect("serialize");
        assert_eq!(json, "payment-method");
    }
}
