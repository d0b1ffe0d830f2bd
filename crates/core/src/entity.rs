//! Entity trait: identity + continuity across state changes.

use crate::status::RecordStatus;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Lifecycle status of the record. Inactive records stay stored but are
    /// excluded from lookups that ask for active data.
    fn record_status(&self) -> RecordStatus {
        RecordStatus::Active
    }

    fn is_active(&self) -> bool {
        self.record_status().is_active()
    }
}
