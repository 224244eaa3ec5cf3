//! Observer callbacks and their subscriptions.

use crate::ObserverResult;

/// The decoder's enable/disable status at a point in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DecodeState {
    /// Decode has not started yet or was re-synchronized after an error.
    #[default]
    Unknown,
    /// Tracing is disabled.
    Disabled,
    /// Tracing is enabled.
    Enabled,
}

/// A time notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick {
    /// The current trace time.
    pub tsc: u64,
    /// MTC packets that could not be used for time tracking.
    pub lost_mtc: u32,
    /// CYC packets that could not be used for time tracking.
    pub lost_cyc: u32,
}

/// One of the three notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Time-ordered notifications, gated by [`Subscription::limit`].
    Tick,
    /// Decode state changes.
    State,
    /// Instruction pointer changes.
    Ip,
}

impl Channel {
    /// All channels, in queue order.
    pub const ALL: [Self; 3] = [Self::Tick, Self::State, Self::Ip];

    pub(crate) const fn slot(self) -> usize {
        match self {
            Self::Tick => 0,
            Self::State => 1,
            Self::Ip => 2,
        }
    }
}

/// The channels an observer listens on.
///
/// A set flag means the observer's callback for that channel is active.
/// Callbacks receive their own subscription and may change it; clearing a
/// flag from inside a callback unsubscribes, setting one subscribes, and
/// changing `limit` reschedules the next tick notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Subscription {
    /// Listen for time notifications.
    pub tick: bool,
    /// Notify once the trace time reaches this value.
    pub limit: u64,
    /// Listen for decode state changes.
    pub state: bool,
    /// Listen for instruction pointer changes.
    pub ip: bool,
}

impl Subscription {
    /// No channels.
    pub const NONE: Self = Self {
        tick: false,
        limit: 0,
        state: false,
        ip: false,
    };

    /// Tick notifications from `limit` on.
    #[must_use]
    pub const fn tick_at(limit: u64) -> Self {
        Self {
            tick: true,
            limit,
            ..Self::NONE
        }
    }

    /// State notifications only.
    #[must_use]
    pub const fn state_only() -> Self {
        Self {
            state: true,
            ..Self::NONE
        }
    }

    /// Ip notifications only.
    #[must_use]
    pub const fn ip_only() -> Self {
        Self {
            ip: true,
            ..Self::NONE
        }
    }

    /// Add tick notifications from `limit` on.
    #[must_use]
    pub const fn with_tick(mut self, limit: u64) -> Self {
        self.tick = true;
        self.limit = limit;
        self
    }

    /// Add state notifications.
    #[must_use]
    pub const fn with_state(mut self) -> Self {
        self.state = true;
        self
    }

    /// Add ip notifications.
    #[must_use]
    pub const fn with_ip(mut self) -> Self {
        self.ip = true;
        self
    }

    /// Check whether `channel` is active.
    #[must_use]
    pub const fn is_subscribed(&self, channel: Channel) -> bool {
        match channel {
            Channel::Tick => self.tick,
            Channel::State => self.state,
            Channel::Ip => self.ip,
        }
    }

    /// Check whether no channel is active.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.tick && !self.state && !self.ip
    }
}

/// A decode progress observer.
///
/// The collection calls these while it dispatches; only channels active in
/// the observer's [`Subscription`] are called. An observer may only change
/// its own subscription, and only through the reference it is handed.
///
/// Errors are passed to the caller of the `notify_*` method unchanged after
/// the collection applied the subscription changes of the failing call.
pub trait Observer {
    /// The trace time reached `subscription.limit`.
    fn on_tick(&mut self, subscription: &mut Subscription, tick: Tick) -> ObserverResult<()> {
        let _ = (subscription, tick);
        Ok(())
    }

    /// The decode state changed.
    fn on_state(
        &mut self,
        subscription: &mut Subscription,
        state: DecodeState,
    ) -> ObserverResult<()> {
        let _ = (subscription, state);
        Ok(())
    }

    /// The instruction pointer changed.
    fn on_ip(&mut self, subscription: &mut Subscription, ip: u64) -> ObserverResult<()> {
        let _ = (subscription, ip);
        Ok(())
    }
}

impl<O: Observer + ?Sized> Observer for Box<O> {
    fn on_tick(&mut self, subscription: &mut Subscription, tick: Tick) -> ObserverResult<()> {
        (**self).on_tick(subscription, tick)
    }

    fn on_state(
        &mut self,
        subscription: &mut Subscription,
        state: DecodeState,
    ) -> ObserverResult<()> {
        (**self).on_state(subscription, state)
    }

    fn on_ip(&mut self, subscription: &mut Subscription, ip: u64) -> ObserverResult<()> {
        (**self).on_ip(subscription, ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_builders() {
        let sub = Subscription::tick_at(7).with_state();
        assert!(sub.is_subscribed(Channel::Tick));
        assert!(sub.is_subscribed(Channel::State));
        assert!(!sub.is_subscribed(Channel::Ip));
        assert_eq!(sub.limit, 7);

        assert!(Subscription::NONE.is_empty());
        assert!(!Subscription::ip_only().is_empty());
    }

    #[test]
    fn test_channel_slots_are_distinct() {
        let slots: Vec<_> = Channel::ALL.iter().map(|c| c.slot()).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn test_boxed_observer_forwards() {
        struct Flip;

        impl Observer for Flip {
            fn on_state(
                &mut self,
                subscription: &mut Subscription,
                _state: DecodeState,
            ) -> ObserverResult<()> {
                subscription.state = false;
                Ok(())
            }
        }

        let mut boxed: Box<dyn Observer> = Box::new(Flip);
        let mut sub = Subscription::state_only();
        boxed.on_state(&mut sub, DecodeState::Enabled).unwrap();
        assert!(!sub.state);
    }
}
