//! Observer handles.
//!
//! An [`ObserverId`] names an arena slot together with the tenancy of that
//! slot it was issued for. Removing an observer starts a new tenancy, so a
//! handle its owner kept around after [`remove`] no longer resolves, even
//! once the slot holds another observer.
//!
//! [`remove`]: crate::ObserverCollection::remove

use std::fmt;

/// Tenancy of an arena slot. Wraps after `u32::MAX` removals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Generation(u32);

impl Generation {
    pub(crate) const FIRST: Self = Self(0);

    /// The tenancy that follows this one.
    pub(crate) const fn bump(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Raw slot index into the observer arena.
pub(crate) type Index = u32;

/// A handle to an observer stored in an [`ObserverCollection`].
///
/// Handles stay valid until the observer is removed. They are cheap to copy
/// and carry no borrow of the collection.
///
/// [`ObserverCollection`]: crate::ObserverCollection
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId {
    slot: Index,
    generation: Generation,
}

impl ObserverId {
    pub(crate) const fn new(slot: Index, generation: Generation) -> Self {
        Self { slot, generation }
    }

    /// The arena slot. Reused after removal.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.slot
    }

    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }
}

impl fmt::Debug for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverId({self})")
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.slot, self.generation.0)
    }
}
