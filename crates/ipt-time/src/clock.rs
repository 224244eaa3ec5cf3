//! The decoder's view of trace time.
//!
//! Packet parsing and calibration happen elsewhere. The clock only keeps the
//! result: the last time estimate and how many timing packets could not be
//! used since the last TSC.

use ipt_observer::{Observer, ObserverCollection, Tick};

use crate::{TimeError, TimeResult};

/// Trace time state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Clock {
    tsc: Option<u64>,
    lost_mtc: u32,
    lost_cyc: u32,
    cbr: Option<u8>,
}

impl Clock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tsc: None,
            lost_mtc: 0,
            lost_cyc: 0,
            cbr: None,
        }
    }

    /// Set the time from a TSC packet.
    ///
    /// A TSC is exact, so the lost packet counters start over.
    pub const fn update_tsc(&mut self, tsc: u64) {
        self.tsc = Some(tsc);
        self.lost_mtc = 0;
        self.lost_cyc = 0;
    }

    /// Advance the time by a calibrated delta.
    ///
    /// Without a TSC there is nothing to advance and the packet counts as a
    /// lost CYC. Returns whether the time changed.
    pub const fn advance(&mut self, delta: u64) -> bool {
        match self.tsc {
            Some(tsc) => {
                self.tsc = Some(tsc.saturating_add(delta));
                true
            }
            None => {
                self.lose_cyc();
                false
            }
        }
    }

    /// Count an MTC that could not be used.
    pub const fn lose_mtc(&mut self) {
        self.lost_mtc = self.lost_mtc.saturating_add(1);
    }

    /// Count a CYC that could not be used.
    pub const fn lose_cyc(&mut self) {
        self.lost_cyc = self.lost_cyc.saturating_add(1);
    }

    pub const fn update_cbr(&mut self, ratio: u8) {
        self.cbr = Some(ratio);
    }

    /// The current time and the packets lost since the last TSC.
    pub const fn query(&self) -> TimeResult<Tick> {
        match self.tsc {
            Some(tsc) => Ok(Tick {
                tsc,
                lost_mtc: self.lost_mtc,
                lost_cyc: self.lost_cyc,
            }),
            None => Err(TimeError::NoTime),
        }
    }

    /// The last core:bus ratio.
    pub const fn cbr(&self) -> TimeResult<u8> {
        match self.cbr {
            Some(cbr) => Ok(cbr),
            None => Err(TimeError::NoCbr),
        }
    }
}

/// A clock that notifies tick observers whenever the time changes.
pub struct ObservedClock<O> {
    clock: Clock,
    observers: ObserverCollection<O>,
}

impl<O: Observer> ObservedClock<O> {
    #[must_use]
    pub const fn new(observers: ObserverCollection<O>) -> Self {
        Self {
            clock: Clock::new(),
            observers,
        }
    }

    #[must_use]
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    #[must_use]
    pub const fn observers(&self) -> &ObserverCollection<O> {
        &self.observers
    }

    pub const fn observers_mut(&mut self) -> &mut ObserverCollection<O> {
        &mut self.observers
    }

    pub fn into_parts(self) -> (Clock, ObserverCollection<O>) {
        (self.clock, self.observers)
    }

    pub fn update_tsc(&mut self, tsc: u64) -> TimeResult<()> {
        self.clock.update_tsc(tsc);
        self.notify()
    }

    pub fn advance(&mut self, delta: u64) -> TimeResult<()> {
        if self.clock.advance(delta) {
            self.notify()?;
        }
        Ok(())
    }

    pub const fn lose_mtc(&mut self) {
        self.clock.lose_mtc();
    }

    pub const fn lose_cyc(&mut self) {
        self.clock.lose_cyc();
    }

    pub const fn update_cbr(&mut self, ratio: u8) {
        self.clock.update_cbr(ratio);
    }

    fn notify(&mut self) -> TimeResult<()> {
        let now = self.clock.query()?;
        self.observers.tick(now.tsc, now.lost_mtc, now.lost_cyc)?;
        Ok(())
    }
}
