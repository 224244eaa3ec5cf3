//! Observer slot storage.
//!
//! Every queue is an index-linked list threaded through the arena entries,
//! one link per channel. Membership is tracked explicitly: the only element
//! of a queue has no successor but is still queued.

use crate::id::Index;
use crate::{Channel, Generation, ObserverError, ObserverId, ObserverResult, Subscription};

/// A channel link of a queued observer.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Link {
    /// The next observer on this channel's queue.
    pub next: Option<Index>,
    /// Whether the observer is on this channel's queue.
    pub queued: bool,
}

/// A live observer with its subscription and queue links.
pub(crate) struct Entry<O> {
    pub observer: O,
    pub subscription: Subscription,
    links: [Link; 3],
    /// Set once the observer was added to the collection.
    pub attached: bool,
}

impl<O> Entry<O> {
    pub fn link(&self, channel: Channel) -> &Link {
        &self.links[channel.slot()]
    }

    pub fn link_mut(&mut self, channel: Channel) -> &mut Link {
        &mut self.links[channel.slot()]
    }

    pub fn is_queued(&self, channel: Channel) -> bool {
        self.link(channel).queued
    }
}

struct Slot<O> {
    generation: Generation,
    entry: Option<Entry<O>>,
}

/// Generational arena of observers.
pub(crate) struct Arena<O> {
    slots: Vec<Slot<O>>,
    /// Free list of recycled slot indices.
    free_list: Vec<Index>,
    /// Number of live observers.
    len: u32,
}

impl<O> Default for Arena<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> Arena<O> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Store a new observer, unqueued.
    pub fn insert(&mut self, observer: O, subscription: Subscription) -> ObserverId {
        let entry = Entry {
            observer,
            subscription,
            links: [Link::default(); 3],
            attached: false,
        };

        self.len += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            ObserverId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as Index;
            self.slots.push(Slot {
                generation: Generation::FIRST,
                entry: Some(entry),
            });
            ObserverId::new(index, Generation::FIRST)
        }
    }

    /// Remove an observer, invalidating its handle.
    ///
    /// The caller must have unlinked it from every queue.
    pub fn remove(&mut self, id: ObserverId) -> Option<Entry<O>> {
        let index = self.resolve(id)?;
        let slot = &mut self.slots[index as usize];
        let entry = slot.entry.take()?;

        // Old handles must not resolve to the slot's next tenant.
        slot.generation = slot.generation.bump();
        self.free_list.push(index);
        self.len -= 1;
        Some(entry)
    }

    /// Map a handle to its slot index if the observer is alive.
    pub fn resolve(&self, id: ObserverId) -> Option<Index> {
        let slot = self.slots.get(id.index() as usize)?;
        (slot.generation == id.generation() && slot.entry.is_some()).then_some(id.index())
    }

    /// Build the handle for a live slot.
    pub fn id_of(&self, index: Index) -> ObserverId {
        let generation = self
            .slots
            .get(index as usize)
            .map_or(Generation::FIRST, |slot| slot.generation);
        ObserverId::new(index, generation)
    }

    pub fn get(&self, id: ObserverId) -> Option<&Entry<O>> {
        let index = self.resolve(id)?;
        self.slots[index as usize].entry.as_ref()
    }

    pub fn get_mut(&mut self, id: ObserverId) -> Option<&mut Entry<O>> {
        let index = self.resolve(id)?;
        self.slots[index as usize].entry.as_mut()
    }

    /// Access a queued entry by index.
    ///
    /// Queue links only ever name live slots; anything else is a broken queue.
    pub fn entry(&self, index: Index) -> ObserverResult<&Entry<O>> {
        self.slots
            .get(index as usize)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(ObserverError::Internal("queue links a vacant observer slot"))
    }

    pub fn entry_mut(&mut self, index: Index) -> ObserverResult<&mut Entry<O>> {
        self.slots
            .get_mut(index as usize)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(ObserverError::Internal("queue links a vacant observer slot"))
    }

    pub const fn len(&self) -> u32 {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_remove() {
        let mut arena = Arena::new();

        let a = arena.insert('a', Subscription::NONE);
        let b = arena.insert('b', Subscription::state_only());
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena.len(), 2);

        let entry = arena.remove(a).unwrap();
        assert_eq!(entry.observer, 'a');
        assert!(arena.get(a).is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_recycled_slot_rejects_stale_handle() {
        let mut arena = Arena::new();

        let a = arena.insert(1, Subscription::NONE);
        arena.remove(a);

        let b = arena.insert(2, Subscription::NONE);
        assert_eq!(b.index(), a.index());
        assert_ne!(b.generation(), a.generation());
        assert!(arena.resolve(a).is_none());
        assert_eq!(arena.get(b).unwrap().observer, 2);
        assert_eq!(arena.id_of(b.index()), b);
    }

    #[test]
    fn test_vacant_entry_is_internal_error() {
        let arena: Arena<()> = Arena::new();
        assert!(matches!(arena.entry(4), Err(ObserverError::Internal(_))));
    }
}
