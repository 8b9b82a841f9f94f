//! Session-scoped staging for removed cart lines.
//!
//! Removing a line moves it here instead of deleting it, so the UI can
//! offer undo for the rest of the session. The registry never reads the
//! wall clock: removal instants come from the caller, and expiry is the
//! caller's decision via [`RestorableItemRegistry::age_at`].

use std::time::{Duration, Instant};

use cartwheel_core::ItemUuid;

use super::types::CartItem;

/// A removed line held for possible restoration.
#[derive(Debug, Clone)]
pub struct RestorableItem {
    /// The removed line, exactly as it was in the cart.
    pub item: CartItem,
    /// When the removal happened.
    pub removed_at: Instant,
}

/// Staging area for removed lines, in removal order.
#[derive(Debug, Default)]
pub struct RestorableItemRegistry {
    staged: Vec<RestorableItem>,
}

impl RestorableItemRegistry {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self { staged: Vec::new() }
    }

    /// Stage a removed line at `now`.
    ///
    /// Returns `false` (leaving the existing entry untouched) when the
    /// uuid is already staged; a line can be staged at most once at a
    /// time.
    pub fn stage_at(&mut self, item: CartItem, now: Instant) -> bool {
        if self.contains(item.uuid) {
            return false;
        }
        self.staged.push(RestorableItem {
            item,
            removed_at: now,
        });
        true
    }

    /// Take a staged line out of the registry for restoration.
    ///
    /// Removal-before-re-add is what prevents duplicate-restore races:
    /// once taken, a second `restore` of the same uuid finds nothing.
    pub fn take(&mut self, uuid: ItemUuid) -> Option<CartItem> {
        let index = self.staged.iter().position(|entry| entry.item.uuid == uuid)?;
        Some(self.staged.remove(index).item)
    }

    /// Whether a line with this uuid is currently staged.
    #[must_use]
    pub fn contains(&self, uuid: ItemUuid) -> bool {
        self.staged.iter().any(|entry| entry.item.uuid == uuid)
    }

    /// How long a staged line has been sitting in the registry as of
    /// `now`, or `None` if it is not staged.
    #[must_use]
    pub fn age_at(&self, uuid: ItemUuid, now: Instant) -> Option<Duration> {
        self.staged
            .iter()
            .find(|entry| entry.item.uuid == uuid)
            .map(|entry| now.saturating_duration_since(entry.removed_at))
    }

    /// Staged lines in removal order.
    #[must_use]
    pub fn items(&self) -> &[RestorableItem] {
        &self.staged
    }

    /// Drop all staged lines (checkout completion or session teardown).
    pub fn clear(&mut self) {
        self.staged.clear();
    }

    /// Number of staged lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }
}
