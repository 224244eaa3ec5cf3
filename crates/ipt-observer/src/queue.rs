//! Queue maintenance for the observer collection.
//!
//! The tick queue is sorted by ascending limit; equal limits keep insertion
//! order. State and ip queues are unordered and grow at the head.

use crate::error::keep_first;
use crate::id::Index;
use crate::{Channel, ObserverCollection, ObserverError, ObserverResult, Subscription};

/// A position in a queue: the link slot that names the next observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cursor {
    /// The queue head.
    Head,
    /// The link of the given observer.
    After(Index),
}

impl<O> ObserverCollection<O> {
    /// The observer the link at `cursor` points to.
    pub(crate) fn next_at(&self, channel: Channel, cursor: Cursor) -> ObserverResult<Option<Index>> {
        match cursor {
            Cursor::Head => Ok(self.heads[channel.slot()]),
            Cursor::After(index) => Ok(self.arena.entry(index)?.link(channel).next),
        }
    }

    /// Redirect the link at `cursor`.
    pub(crate) fn set_next_at(
        &mut self,
        channel: Channel,
        cursor: Cursor,
        next: Option<Index>,
    ) -> ObserverResult<()> {
        match cursor {
            Cursor::Head => self.heads[channel.slot()] = next,
            Cursor::After(index) => self.arena.entry_mut(index)?.link_mut(channel).next = next,
        }
        Ok(())
    }

    /// Sort `index` into the tick sub-list its tick link points to.
    ///
    /// The observer lands in front of the first observer with a strictly
    /// greater limit, i.e. behind all observers with an equal limit.
    ///
    /// Returns the new head of the sub-list.
    pub(crate) fn postpone_tick(&mut self, index: Index) -> ObserverResult<Index> {
        let entry = self.arena.entry(index)?;
        let limit = entry.subscription.limit;
        let root = entry.link(Channel::Tick).next;

        let mut prev = None;
        let mut next = root;
        while let Some(candidate) = next {
            let entry = self.arena.entry(candidate)?;
            if limit < entry.subscription.limit {
                break;
            }

            prev = Some(candidate);
            next = entry.link(Channel::Tick).next;
        }

        self.arena.entry_mut(index)?.link_mut(Channel::Tick).next = next;

        match (prev, root) {
            (None, _) => Ok(index),
            (Some(prev), Some(root)) => {
                self.arena.entry_mut(prev)?.link_mut(Channel::Tick).next = Some(index);
                Ok(root)
            }
            (Some(_), None) => Err(ObserverError::Internal("tick sub-list lost its root")),
        }
    }

    /// Put `index` back into the tick queue after it left the traversal.
    pub(crate) fn requeue_tick(&mut self, index: Index) -> ObserverResult<()> {
        let head = self.heads[Channel::Tick.slot()];
        self.arena.entry_mut(index)?.link_mut(Channel::Tick).next = head;

        let head = self.postpone_tick(index)?;
        self.heads[Channel::Tick.slot()] = Some(head);
        Ok(())
    }

    pub(crate) fn add_tick(&mut self, index: Index) -> ObserverResult<()> {
        let entry = self.arena.entry_mut(index)?;
        if !entry.subscription.tick {
            return Err(ObserverError::Invalid("tick observer without tick subscription"));
        }

        let link = entry.link_mut(Channel::Tick);
        if link.queued || link.next.is_some() {
            return Err(ObserverError::Invalid("observer is already on the tick queue"));
        }
        link.queued = true;

        self.requeue_tick(index)?;
        self.refresh_tick_limit()?;

        tracing::trace!(
            observer = ?self.arena.id_of(index),
            limit = self.tick_limit,
            "tick observer queued"
        );
        Ok(())
    }

    /// Prepend `index` to an unordered queue.
    pub(crate) fn add_unordered(&mut self, channel: Channel, index: Index) -> ObserverResult<()> {
        let head = self.heads[channel.slot()];

        let entry = self.arena.entry_mut(index)?;
        if !entry.subscription.is_subscribed(channel) {
            return Err(ObserverError::Invalid("observer without matching subscription"));
        }

        let link = entry.link_mut(channel);
        if link.queued || link.next.is_some() {
            return Err(ObserverError::Invalid("observer is already queued on this channel"));
        }
        link.queued = true;
        link.next = head;

        self.heads[channel.slot()] = Some(index);

        tracing::trace!(observer = ?self.arena.id_of(index), ?channel, "observer queued");
        Ok(())
    }

    /// Take `index` off `channel`'s queue, wherever it is.
    pub(crate) fn unlink(&mut self, channel: Channel, index: Index) -> ObserverResult<()> {
        let mut cursor = Cursor::Head;
        while let Some(next) = self.next_at(channel, cursor)? {
            if next == index {
                let rest = self.arena.entry(index)?.link(channel).next;
                self.set_next_at(channel, cursor, rest)?;
                break;
            }

            cursor = Cursor::After(next);
        }

        *self.arena.entry_mut(index)?.link_mut(channel) = Default::default();

        if channel == Channel::Tick {
            self.refresh_tick_limit()?;
        }

        tracing::trace!(observer = ?self.arena.id_of(index), ?channel, "observer unlinked");
        Ok(())
    }

    /// Check whether `channel`'s queue contains `index` by walking it.
    pub(crate) fn contains(&self, channel: Channel, index: Index) -> ObserverResult<bool> {
        let mut next = self.heads[channel.slot()];
        while let Some(candidate) = next {
            if candidate == index {
                return Ok(true);
            }
            next = self.arena.entry(candidate)?.link(channel).next;
        }
        Ok(false)
    }

    /// Recompute the cached tick limit from the tick queue's head.
    pub(crate) fn refresh_tick_limit(&mut self) -> ObserverResult<()> {
        self.tick_limit = match self.heads[Channel::Tick.slot()] {
            Some(head) => self.arena.entry(head)?.subscription.limit,
            None => u64::MAX,
        };
        Ok(())
    }

    /// Bring the tick queue in line with a subscription change made outside
    /// of a tick dispatch.
    pub(crate) fn update_tick(&mut self, index: Index, prev: Subscription) -> ObserverResult<()> {
        let now = self.arena.entry(index)?.subscription;

        match (prev.tick, now.tick) {
            (false, true) => self.add_tick(index),
            (true, true) if prev.limit != now.limit => {
                self.unlink(Channel::Tick, index)?;
                self.add_tick(index)
            }
            (true, false) => self.unlink(Channel::Tick, index),
            _ => Ok(()),
        }
    }

    /// Bring an unordered queue in line with a subscription change made
    /// outside of that queue's dispatch.
    pub(crate) fn update_unordered(
        &mut self,
        channel: Channel,
        index: Index,
        prev: Subscription,
    ) -> ObserverResult<()> {
        let now = self.arena.entry(index)?.subscription;

        match (prev.is_subscribed(channel), now.is_subscribed(channel)) {
            (false, true) => self.add_unordered(channel, index),
            (true, false) => self.unlink(channel, index),
            _ => Ok(()),
        }
    }

    /// Reconcile every channel except `native` against `prev`.
    ///
    /// All channels are attempted; the first error is returned.
    pub(crate) fn reconcile(
        &mut self,
        native: Option<Channel>,
        index: Index,
        prev: Subscription,
    ) -> ObserverResult<()> {
        let mut status = Ok(());

        for channel in Channel::ALL {
            if Some(channel) == native {
                continue;
            }

            let result = match channel {
                Channel::Tick => self.update_tick(index, prev),
                Channel::State | Channel::Ip => self.update_unordered(channel, index, prev),
            };
            keep_first(&mut status, result);
        }

        status
    }
}
