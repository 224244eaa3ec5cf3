//! Periodic time sampling.

use ipt_observer::{Observer, ObserverResult, Subscription, Tick};
use serde::{Deserialize, Serialize};

use crate::{TimeError, TimeResult};

/// Time tracker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeTrackerConfig {
    /// The time of the first sample.
    pub start: u64,
    /// The time between two samples. Must not be zero.
    pub period: u64,
    /// Stop after this many samples.
    pub max_samples: Option<usize>,
}

impl Default for TimeTrackerConfig {
    fn default() -> Self {
        Self {
            start: 0,
            period: 1,
            max_samples: None,
        }
    }
}

impl TimeTrackerConfig {
    #[must_use]
    pub const fn with_start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    #[must_use]
    pub const fn with_period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    #[must_use]
    pub const fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = Some(max_samples);
        self
    }
}

/// A time sample taken by a [`TimeTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSample {
    /// The time at which the sample was requested.
    pub due: u64,
    /// The time at which the sample was taken.
    pub tsc: u64,
    pub lost_mtc: u32,
    pub lost_cyc: u32,
}

impl TimeSample {
    /// How far the trace time had moved past the requested time.
    #[must_use]
    pub const fn late(&self) -> u64 {
        self.tsc.saturating_sub(self.due)
    }
}

/// Samples trace time once per period.
///
/// After every sample the tracker moves its tick limit one period past the
/// current time. When the trace time jumped over several periods at once,
/// only one sample is taken.
#[derive(Debug, Clone)]
pub struct TimeTracker {
    config: TimeTrackerConfig,
    samples: Vec<TimeSample>,
}

impl TimeTracker {
    pub fn new(config: TimeTrackerConfig) -> TimeResult<Self> {
        if config.period == 0 {
            return Err(TimeError::InvalidPeriod(config.period));
        }

        Ok(Self {
            config,
            samples: Vec::new(),
        })
    }

    /// The subscription to register the tracker with.
    #[must_use]
    pub const fn subscription(&self) -> Subscription {
        Subscription::tick_at(self.config.start)
    }

    #[must_use]
    pub const fn config(&self) -> &TimeTrackerConfig {
        &self.config
    }

    #[must_use]
    pub fn samples(&self) -> &[TimeSample] {
        &self.samples
    }

    /// Check whether the tracker took all the samples it was asked for.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.config
            .max_samples
            .is_some_and(|max| self.samples.len() >= max)
    }
}

impl Observer for TimeTracker {
    fn on_tick(&mut self, subscription: &mut Subscription, tick: Tick) -> ObserverResult<()> {
        let sample = TimeSample {
            due: subscription.limit,
            tsc: tick.tsc,
            lost_mtc: tick.lost_mtc,
            lost_cyc: tick.lost_cyc,
        };
        self.samples.push(sample);

        if self.is_done() {
            tracing::debug!(samples = self.samples.len(), "time tracking done");
            subscription.tick = false;
            return Ok(());
        }

        subscription.limit = tick.tsc.saturating_add(self.config.period);
        tracing::trace!(tsc = tick.tsc, next = subscription.limit, late = sample.late(), "time sample");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_period_is_rejected() {
        let config = TimeTrackerConfig::default().with_period(0);
        assert!(matches!(
            TimeTracker::new(config),
            Err(TimeError::InvalidPeriod(0))
        ));
    }

    #[test]
    fn test_rearms_one_period_later() {
        let mut tracker = TimeTracker::new(TimeTrackerConfig::default().with_period(10)).unwrap();
        let mut sub = tracker.subscription();

        tracker
            .on_tick(&mut sub, Tick {
                tsc: 3,
                lost_mtc: 1,
                lost_cyc: 0,
            })
            .unwrap();

        assert!(sub.tick);
        assert_eq!(sub.limit, 13);
        assert_eq!(tracker.samples()[0].late(), 3);
        assert_eq!(tracker.samples()[0].lost_mtc, 1);
    }

    #[test]
    fn test_stops_after_max_samples() {
        let config = TimeTrackerConfig::default().with_max_samples(1);
        let mut tracker = TimeTracker::new(config).unwrap();
        let mut sub = tracker.subscription();

        tracker.on_tick(&mut sub, Tick::default()).unwrap();

        assert!(tracker.is_done());
        assert!(!sub.tick);
    }

    #[test]
    fn test_config_from_json() {
        let config: TimeTrackerConfig =
            serde_json::from_str(r#"{ "period": 100, "max_samples": 4 }"#).unwrap();

        assert_eq!(
            config,
            TimeTrackerConfig::default()
                .with_period(100)
                .with_max_samples(4)
        );
    }
}
