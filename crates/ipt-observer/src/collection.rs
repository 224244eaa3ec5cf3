//! The observer collection and its dispatch loops.

use smallvec::SmallVec;

use crate::arena::Arena;
use crate::error::keep_first;
use crate::id::Index;
use crate::queue::Cursor;
use crate::{
    Channel, DecodeState, Observer, ObserverError, ObserverId, ObserverResult, Subscription, Tick,
};

/// Observers parked during a tick pass because they moved their limit back.
type Fixup = SmallVec<[Index; 4]>;

/// A collection of decode observers.
///
/// The collection owns the observers' storage but never decides their
/// lifetime: owners [`insert`](Self::insert) and [`remove`](Self::remove)
/// them. An observer is queued on every channel its [`Subscription`] names
/// once it was [`add`](Self::add)ed, and is kept in line with the
/// subscription as callbacks and [`update`](Self::update) change it.
///
/// # Example
///
/// ```
/// use ipt_observer::prelude::*;
///
/// #[derive(Default)]
/// struct Counter(u32);
///
/// impl Observer for Counter {
///     fn on_tick(&mut self, sub: &mut Subscription, tick: Tick) -> ObserverResult<()> {
///         self.0 += 1;
///         sub.limit = tick.tsc + 10;
///         Ok(())
///     }
/// }
///
/// let mut observers = ObserverCollection::new();
/// let id = observers.register(Counter::default(), Subscription::tick_at(5)).unwrap();
///
/// observers.tick(4, 0, 0).unwrap();
/// observers.tick(5, 0, 0).unwrap();
/// assert_eq!(observers.get(id).unwrap().0, 1);
/// assert_eq!(observers.tick_limit(), 15);
/// ```
pub struct ObserverCollection<O> {
    pub(crate) arena: Arena<O>,
    /// Queue heads, indexed by [`Channel::slot`].
    pub(crate) heads: [Option<Index>; 3],
    /// The lowest tick limit, or `u64::MAX` without tick observers.
    pub(crate) tick_limit: u64,
}

impl<O> Default for ObserverCollection<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> ObserverCollection<O> {
    /// Create an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            arena: Arena::new(),
            heads: [None; 3],
            tick_limit: u64::MAX,
        }
    }

    /// Store an observer without queueing it.
    pub fn insert(&mut self, observer: O, subscription: Subscription) -> ObserverId {
        self.arena.insert(observer, subscription)
    }

    /// Queue an observer on every channel it is subscribed to.
    ///
    /// An observer without any subscription is accepted rather than
    /// rejected as invalid usage. It is attached but sits on no queue;
    /// channels it subscribes to later through [`update`](Self::update) are
    /// joined from then on.
    pub fn add(&mut self, id: ObserverId) -> ObserverResult<()> {
        let index = self
            .arena
            .resolve(id)
            .ok_or(ObserverError::UnknownObserver(id))?;

        for channel in Channel::ALL {
            if self.contains(channel, index)? {
                return Err(ObserverError::AlreadyRegistered(id));
            }
        }

        let subscription = self.arena.entry(index)?.subscription;
        if subscription.tick {
            self.add_tick(index)?;
        }
        if subscription.state {
            self.add_unordered(Channel::State, index)?;
        }
        if subscription.ip {
            self.add_unordered(Channel::Ip, index)?;
        }

        self.arena.entry_mut(index)?.attached = true;
        Ok(())
    }

    /// Store an observer and queue it.
    pub fn register(&mut self, observer: O, subscription: Subscription) -> ObserverResult<ObserverId> {
        let id = self.insert(observer, subscription);
        self.add(id)?;
        Ok(id)
    }

    /// Change an observer or its subscription from outside a dispatch.
    ///
    /// The queues of an added observer follow the new subscription: dropped
    /// channels are left, new ones joined, and a changed tick limit re-sorts
    /// the tick queue.
    pub fn update<F, R>(&mut self, id: ObserverId, f: F) -> ObserverResult<R>
    where
        F: FnOnce(&mut O, &mut Subscription) -> R,
    {
        let index = self
            .arena
            .resolve(id)
            .ok_or(ObserverError::UnknownObserver(id))?;

        let entry = self.arena.entry_mut(index)?;
        let prev = entry.subscription;
        let output = f(&mut entry.observer, &mut entry.subscription);

        if entry.attached {
            self.reconcile(None, index, prev)?;
        }
        Ok(output)
    }

    /// Unqueue an observer and hand it back to its owner.
    pub fn remove(&mut self, id: ObserverId) -> ObserverResult<O> {
        let index = self
            .arena
            .resolve(id)
            .ok_or(ObserverError::UnknownObserver(id))?;

        for channel in Channel::ALL {
            if self.arena.entry(index)?.is_queued(channel) {
                self.unlink(channel, index)?;
            }
        }

        self.arena
            .remove(id)
            .map(|entry| entry.observer)
            .ok_or(ObserverError::UnknownObserver(id))
    }

    #[must_use]
    pub fn get(&self, id: ObserverId) -> Option<&O> {
        self.arena.get(id).map(|entry| &entry.observer)
    }

    /// Mutable access to the observer itself.
    ///
    /// Use [`update`](Self::update) to change its subscription.
    #[must_use]
    pub fn get_mut(&mut self, id: ObserverId) -> Option<&mut O> {
        self.arena.get_mut(id).map(|entry| &mut entry.observer)
    }

    #[must_use]
    pub fn subscription(&self, id: ObserverId) -> Option<Subscription> {
        self.arena.get(id).map(|entry| entry.subscription)
    }

    /// Check whether an observer is on `channel`'s queue.
    #[must_use]
    pub fn is_queued(&self, id: ObserverId, channel: Channel) -> bool {
        self.arena
            .get(id)
            .is_some_and(|entry| entry.is_queued(channel))
    }

    /// Iterate over `channel`'s queue in dispatch order.
    pub fn queue(&self, channel: Channel) -> impl Iterator<Item = ObserverId> + '_ {
        std::iter::successors(self.heads[channel.slot()], move |&index| {
            self.arena
                .entry(index)
                .ok()
                .and_then(|entry| entry.link(channel).next)
        })
        .map(|index| self.arena.id_of(index))
    }

    /// Number of stored observers, queued or not.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.arena.len() as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The time at which the next tick observer wants to be notified.
    ///
    /// `u64::MAX` if there are no tick observers.
    #[must_use]
    pub const fn tick_limit(&self) -> u64 {
        self.tick_limit
    }
}

impl<O: Observer> ObserverCollection<O> {
    /// Notify tick observers whose limit was reached.
    ///
    /// Observers are called in ascending limit order. An observer that moves
    /// its limit forward is re-sorted into the unvisited part of the queue
    /// and may be called again if the new limit was reached, too. An observer
    /// that moves its limit back is re-queued after the pass.
    ///
    /// The first callback error ends the pass and is returned after the
    /// failing observer's queues were brought in line with its subscription.
    pub fn notify_tick(&mut self, tsc: u64, lost_mtc: u32, lost_cyc: u32) -> ObserverResult<()> {
        if tsc < self.tick_limit {
            return Ok(());
        }

        let tick = Tick {
            tsc,
            lost_mtc,
            lost_cyc,
        };

        let mut fixup = Fixup::new();
        let mut status = self.dispatch_tick(tick, &mut fixup);

        while let Some(index) = fixup.pop() {
            tracing::trace!(observer = ?self.arena.id_of(index), "tick observer requeued");
            keep_first(&mut status, self.requeue_tick(index));
        }

        keep_first(&mut status, self.refresh_tick_limit());

        if let Err(error) = &status {
            tracing::debug!(tsc, %error, "tick dispatch aborted");
        }
        status
    }

    /// Notify state observers of a decode state change.
    pub fn notify_state(&mut self, state: DecodeState) -> ObserverResult<()> {
        self.dispatch_unordered(Channel::State, |observer, subscription| {
            observer.on_state(subscription, state)
        })
        .inspect_err(|error| tracing::debug!(?state, %error, "state dispatch aborted"))
    }

    /// Notify ip observers of an instruction pointer change.
    pub fn notify_ip(&mut self, ip: u64) -> ObserverResult<()> {
        self.dispatch_unordered(Channel::Ip, |observer, subscription| {
            observer.on_ip(subscription, ip)
        })
        .inspect_err(|error| tracing::debug!(ip, %error, "ip dispatch aborted"))
    }

    /// Notify tick observers unless no limit was reached.
    #[inline]
    pub fn tick(&mut self, tsc: u64, lost_mtc: u32, lost_cyc: u32) -> ObserverResult<()> {
        if tsc < self.tick_limit {
            return Ok(());
        }
        self.notify_tick(tsc, lost_mtc, lost_cyc)
    }

    /// Notify state observers, if there are any.
    #[inline]
    pub fn state(&mut self, state: DecodeState) -> ObserverResult<()> {
        if self.heads[Channel::State.slot()].is_none() {
            return Ok(());
        }
        self.notify_state(state)
    }

    /// Notify ip observers, if there are any.
    #[inline]
    pub fn ip(&mut self, ip: u64) -> ObserverResult<()> {
        if self.heads[Channel::Ip.slot()].is_none() {
            return Ok(());
        }
        self.notify_ip(ip)
    }

    fn dispatch_tick(&mut self, tick: Tick, fixup: &mut Fixup) -> ObserverResult<()> {
        let mut cursor = Cursor::Head;

        while let Some(index) = self.next_at(Channel::Tick, cursor)? {
            let entry = self.arena.entry_mut(index)?;

            // Only the observer itself may unsubscribe, inside its callback.
            if !entry.subscription.tick {
                return Err(ObserverError::Invalid(
                    "tick observer unsubscribed outside of its callback",
                ));
            }

            if tick.tsc < entry.subscription.limit {
                break;
            }

            let prev = entry.subscription;
            let rest = entry.link(Channel::Tick).next;

            let mut result = entry.observer.on_tick(&mut entry.subscription, tick);
            let now = entry.subscription;

            if !now.tick {
                *entry.link_mut(Channel::Tick) = Default::default();
                self.set_next_at(Channel::Tick, cursor, rest)?;

                tracing::trace!(observer = ?self.arena.id_of(index), "tick observer unsubscribed");
            } else if prev.limit < now.limit {
                // The observer still links the unvisited rest of the queue.
                let head = self.postpone_tick(index)?;
                self.set_next_at(Channel::Tick, cursor, Some(head))?;

                tracing::trace!(
                    observer = ?self.arena.id_of(index),
                    limit = now.limit,
                    "tick observer postponed"
                );
            } else if now.limit < prev.limit {
                entry.link_mut(Channel::Tick).next = None;
                fixup.push(index);
                self.set_next_at(Channel::Tick, cursor, rest)?;

                tracing::trace!(
                    observer = ?self.arena.id_of(index),
                    limit = now.limit,
                    "tick observer parked"
                );
            } else {
                cursor = Cursor::After(index);
            }

            keep_first(&mut result, self.reconcile(Some(Channel::Tick), index, prev));
            result?;
        }

        Ok(())
    }

    fn dispatch_unordered<F>(&mut self, channel: Channel, mut call: F) -> ObserverResult<()>
    where
        F: FnMut(&mut O, &mut Subscription) -> ObserverResult<()>,
    {
        let mut cursor = Cursor::Head;

        while let Some(index) = self.next_at(channel, cursor)? {
            let entry = self.arena.entry_mut(index)?;

            if !entry.subscription.is_subscribed(channel) {
                return Err(ObserverError::Invalid(
                    "observer unsubscribed outside of its callback",
                ));
            }

            let prev = entry.subscription;
            let rest = entry.link(channel).next;

            let mut result = call(&mut entry.observer, &mut entry.subscription);

            if entry.subscription.is_subscribed(channel) {
                cursor = Cursor::After(index);
            } else {
                *entry.link_mut(channel) = Default::default();
                self.set_next_at(channel, cursor, rest)?;

                tracing::trace!(observer = ?self.arena.id_of(index), ?channel, "observer unsubscribed");
            }

            keep_first(&mut result, self.reconcile(Some(channel), index, prev));
            result?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Moves its tick limit by a fixed step on every call.
    struct Step {
        calls: u32,
        step: i64,
    }

    impl Observer for Step {
        fn on_tick(&mut self, sub: &mut Subscription, _tick: Tick) -> ObserverResult<()> {
            self.calls += 1;
            sub.limit = sub.limit.saturating_add_signed(self.step);
            Ok(())
        }
    }

    fn step(step: i64) -> Step {
        Step { calls: 0, step }
    }

    fn tick_order(observers: &ObserverCollection<Step>) -> Vec<u64> {
        observers
            .queue(Channel::Tick)
            .map(|id| observers.subscription(id).unwrap().limit)
            .collect()
    }

    #[test]
    fn test_new_is_empty() {
        let observers: ObserverCollection<Step> = ObserverCollection::new();
        assert!(observers.is_empty());
        assert_eq!(observers.tick_limit(), u64::MAX);
        for channel in Channel::ALL {
            assert_eq!(observers.queue(channel).count(), 0);
        }
    }

    #[test]
    fn test_equal_limits_keep_insertion_order() {
        let mut observers = ObserverCollection::new();
        let a = observers.register(step(0), Subscription::tick_at(4)).unwrap();
        let b = observers.register(step(0), Subscription::tick_at(2)).unwrap();
        let c = observers.register(step(0), Subscription::tick_at(4)).unwrap();
        let d = observers.register(step(0), Subscription::tick_at(2)).unwrap();

        let order: Vec<_> = observers.queue(Channel::Tick).collect();
        assert_eq!(order, vec![b, d, a, c]);
        assert_eq!(observers.tick_limit(), 2);
    }

    #[test]
    fn test_postponed_observer_fires_again_in_pass() {
        let mut observers = ObserverCollection::new();
        let id = observers.register(step(1), Subscription::tick_at(1)).unwrap();

        observers.notify_tick(3, 0, 0).unwrap();

        // Limits 1, 2 and 3 were all reached by time 3.
        assert_eq!(observers.get(id).unwrap().calls, 3);
        assert_eq!(observers.tick_limit(), 4);
    }

    #[test]
    fn test_parked_observer_is_requeued_sorted() {
        let mut observers = ObserverCollection::new();
        observers.register(step(0), Subscription::tick_at(2)).unwrap();
        let back = observers.register(step(-2), Subscription::tick_at(3)).unwrap();
        observers.register(step(0), Subscription::tick_at(9)).unwrap();

        observers.notify_tick(3, 0, 0).unwrap();

        assert_eq!(observers.get(back).unwrap().calls, 1);
        assert_eq!(tick_order(&observers), vec![1, 2, 9]);
        assert_eq!(observers.tick_limit(), 1);
    }

    #[test]
    fn test_update_resorts_tick_queue() {
        let mut observers = ObserverCollection::new();
        let a = observers.register(step(0), Subscription::tick_at(1)).unwrap();
        observers.register(step(0), Subscription::tick_at(5)).unwrap();

        observers.update(a, |_, sub| sub.limit = 7).unwrap();
        assert_eq!(tick_order(&observers), vec![5, 7]);
        assert_eq!(observers.tick_limit(), 5);

        observers.update(a, |_, sub| sub.tick = false).unwrap();
        assert!(!observers.is_queued(a, Channel::Tick));
        assert_eq!(tick_order(&observers), vec![5]);
    }

    #[test]
    fn test_update_before_add_does_not_queue() {
        let mut observers = ObserverCollection::new();
        let id = observers.insert(step(0), Subscription::NONE);

        observers.update(id, |_, sub| *sub = Subscription::tick_at(3)).unwrap();
        assert!(!observers.is_queued(id, Channel::Tick));
        assert_eq!(observers.tick_limit(), u64::MAX);

        observers.add(id).unwrap();
        assert!(observers.is_queued(id, Channel::Tick));
        assert_eq!(observers.tick_limit(), 3);
    }

    #[test]
    fn test_remove_unlinks_everywhere() {
        let mut observers = ObserverCollection::new();
        let sub = Subscription::tick_at(2).with_state().with_ip();
        let a = observers.register(step(0), sub).unwrap();
        let b = observers.register(step(0), sub).unwrap();

        let removed = observers.remove(a).unwrap();
        assert_eq!(removed.calls, 0);
        for channel in Channel::ALL {
            assert_eq!(observers.queue(channel).collect::<Vec<_>>(), vec![b]);
        }

        assert!(matches!(
            observers.remove(a),
            Err(ObserverError::UnknownObserver(id)) if id == a
        ));
    }

    #[test]
    fn test_gated_wrappers_skip_empty_queues() {
        let mut observers: ObserverCollection<Step> = ObserverCollection::new();
        observers.tick(u64::MAX - 1, 0, 0).unwrap();
        observers.state(DecodeState::Enabled).unwrap();
        observers.ip(0x1000).unwrap();
    }
}
