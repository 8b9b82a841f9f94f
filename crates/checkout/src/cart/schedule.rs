//! Sync scheduling with debounce, single-flight, and superseding.
//!
//! [`SyncSchedule`] is a pure state machine: every transition takes the
//! current `Instant` from the caller and no method reads the wall clock,
//! so coalescing and backoff behavior is unit-testable with a base
//! instant plus offsets. The store's worker task drives it.

use std::time::{Duration, Instant};

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PENDING_TIMEOUT_SECS: u64 = 45;

/// Exponent cap so backoff arithmetic cannot overflow.
const MAX_BACKOFF_SHIFT: u32 = 6;

/// Tunables for the sync schedule.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// Inactivity window before a dirty cart is pushed.
    pub debounce: Duration,
    /// Base delay for exponential retry backoff.
    pub backoff_base: Duration,
    /// Attempts per payload before giving up until the next mutation.
    pub max_attempts: u32,
    /// Bound on a single request, after which it counts as failed.
    pub request_timeout: Duration,
    /// How long confirmation may stay outstanding before the snapshot
    /// flags the recalculation as overdue.
    pub pending_timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            pending_timeout: Duration::from_secs(DEFAULT_PENDING_TIMEOUT_SECS),
        }
    }
}

/// Outcome of a successful sync completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessDisposition {
    /// No mutations arrived while the request was in flight; the cart is
    /// fully confirmed.
    Settled,
    /// The request was superseded; a follow-up carrying the latest
    /// desired state is due immediately.
    FollowUp,
}

/// Outcome of a failed sync completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Another attempt is scheduled for the given instant.
    Retry(Instant),
    /// The retry budget is spent; the schedule stays idle until the next
    /// mutation re-arms it.
    Exhausted {
        /// Attempts made for this payload.
        attempts: u32,
    },
}

/// Per-cart sync state: dirty/debounce tracking, the single in-flight
/// slot, supersede marking, and retry backoff.
#[derive(Debug)]
pub struct SyncSchedule {
    policy: SyncPolicy,
    dirty: bool,
    last_mutation_at: Option<Instant>,
    unconfirmed_since: Option<Instant>,
    in_flight: bool,
    superseded: bool,
    attempts: u32,
    next_attempt_at: Option<Instant>,
    exhausted: bool,
}

impl SyncSchedule {
    /// Create an idle schedule.
    #[must_use]
    pub const fn new(policy: SyncPolicy) -> Self {
        Self {
            policy,
            dirty: false,
            last_mutation_at: None,
            unconfirmed_since: None,
            in_flight: false,
            superseded: false,
            attempts: 0,
            next_attempt_at: None,
            exhausted: false,
        }
    }

    /// The schedule's tunables.
    #[must_use]
    pub const fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Record a local mutation at `now`.
    ///
    /// Restarts the debounce window, marks any in-flight request as
    /// superseded, and re-arms an exhausted schedule — a fresh user
    /// intent gets a fresh retry budget.
    pub fn note_mutation_at(&mut self, now: Instant) {
        self.dirty = true;
        self.last_mutation_at = Some(now);
        if self.unconfirmed_since.is_none() {
            self.unconfirmed_since = Some(now);
        }
        if self.in_flight {
            self.superseded = true;
        } else {
            self.next_attempt_at = None;
        }
        self.exhausted = false;
        self.attempts = 0;
    }

    /// Whether local state awaits server confirmation.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.dirty || self.in_flight
    }

    /// Whether the in-flight request has been superseded by newer
    /// mutations (its response will be used for the version check only).
    #[must_use]
    pub const fn is_superseded(&self) -> bool {
        self.superseded
    }

    /// Whether the retry budget for the current payload is spent.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Failed attempts for the current payload.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the first still-unconfirmed mutation was issued.
    #[must_use]
    pub const fn unconfirmed_since(&self) -> Option<Instant> {
        self.unconfirmed_since
    }

    /// Instant at which the pending recalculation becomes overdue.
    #[must_use]
    pub fn overdue_at(&self) -> Option<Instant> {
        self.unconfirmed_since
            .map(|since| since + self.policy.pending_timeout)
    }

    /// Whether confirmation has been outstanding past the pending
    /// timeout.
    #[must_use]
    pub fn is_overdue_at(&self, now: Instant) -> bool {
        self.overdue_at().is_some_and(|at| now >= at)
    }

    /// When the next request should start, if one is wanted at all.
    ///
    /// `None` while a request is in flight (the follow-up is scheduled on
    /// completion), while the cart is clean, or after exhaustion.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.in_flight || !self.dirty || self.exhausted {
            return None;
        }
        if let Some(at) = self.next_attempt_at {
            return Some(at);
        }
        self.last_mutation_at.map(|at| at + self.policy.debounce)
    }

    /// Whether a request is due at `now`.
    #[must_use]
    pub fn is_due_at(&self, now: Instant) -> bool {
        self.next_deadline().is_some_and(|deadline| deadline <= now)
    }

    /// Claim the single in-flight slot.
    ///
    /// Returns `false` when nothing is due at `now` (the caller raced a
    /// newer mutation that pushed the deadline out).
    pub fn start_in_flight_at(&mut self, now: Instant) -> bool {
        if !self.is_due_at(now) {
            return false;
        }
        self.in_flight = true;
        self.superseded = false;
        self.dirty = false;
        self.next_attempt_at = None;
        true
    }

    /// Record a successful round-trip at `now`.
    pub fn complete_success_at(&mut self, now: Instant) -> SuccessDisposition {
        self.in_flight = false;
        self.attempts = 0;
        if self.superseded || self.dirty {
            // Newer mutations exist; push them without another debounce.
            self.superseded = false;
            self.dirty = true;
            self.next_attempt_at = Some(now);
            SuccessDisposition::FollowUp
        } else {
            self.unconfirmed_since = None;
            SuccessDisposition::Settled
        }
    }

    /// Record a failed round-trip at `now`, scheduling a backoff retry
    /// until the budget runs out.
    pub fn complete_failure_at(&mut self, now: Instant) -> FailureDisposition {
        self.fail_with_delay(now, None)
    }

    /// Record a rate-limited round-trip at `now`, honoring the server's
    /// requested delay instead of the local backoff curve.
    pub fn complete_rate_limited_at(
        &mut self,
        now: Instant,
        retry_after: Duration,
    ) -> FailureDisposition {
        self.fail_with_delay(now, Some(retry_after))
    }

    fn fail_with_delay(
        &mut self,
        now: Instant,
        override_delay: Option<Duration>,
    ) -> FailureDisposition {
        self.in_flight = false;
        self.superseded = false;
        self.dirty = true;
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            self.exhausted = true;
            self.next_attempt_at = None;
            FailureDisposition::Exhausted {
                attempts: self.attempts,
            }
        } else {
            let delay = override_delay.unwrap_or_else(|| self.backoff_delay());
            let at = now + delay;
            self.next_attempt_at = Some(at);
            FailureDisposition::Retry(at)
        }
    }

    /// Exponential backoff with jitter: `base * 2^(attempts - 1)` plus up
    /// to half of `base`, capped to keep the shift in range.
    fn backoff_delay(&self) -> Duration {
        let shift = self.attempts.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        let base = self.policy.backoff_base;
        let jitter_ceiling = (base / 2).as_millis().max(1);
        #[allow(clippy::cast_possible_truncation)]
        let jitter = Duration::from_millis(rand::random_range(0..jitter_ceiling) as u64);
        base.saturating_mul(1_u32 << shift) + jitter
    }
}
