//! Sideband listing in trace order.

use ipt_observer::{Observer, ObserverResult, Subscription, Tick};

use crate::config::DumperConfig;
use crate::record::SidebandEvent;

type Events = Box<dyn Iterator<Item = SidebandEvent>>;

/// Lists sideband records between the trace packets they belong to.
///
/// Every record is listed once the trace time reaches it. Records without a
/// time sample are listed right away.
pub struct SidebandDumper {
    config: DumperConfig,
    events: Events,
    /// The next record and its position in the stream.
    current: Option<(usize, SidebandEvent)>,
    position: usize,
    walked: usize,
    lines: Vec<String>,
}

impl SidebandDumper {
    /// Create a dumper over `events` and the subscription to register it with.
    pub fn new<I>(config: DumperConfig, events: I) -> (Self, Subscription)
    where
        I: IntoIterator<Item = SidebandEvent>,
        I::IntoIter: 'static,
    {
        let mut dumper = Self {
            config,
            events: Box::new(events.into_iter()),
            current: None,
            position: 0,
            walked: 0,
            lines: Vec::new(),
        };

        let mut subscription = Subscription::tick_at(0);
        dumper.setup(&mut subscription);
        (dumper, subscription)
    }

    /// The listing so far.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }

    /// The number of records walked, listed or not.
    #[must_use]
    pub const fn walked(&self) -> usize {
        self.walked
    }

    fn setup(&mut self, sub: &mut Subscription) {
        let Some(event) = self.events.next() else {
            self.current = None;
            sub.tick = false;
            return;
        };

        sub.limit = event
            .tsc
            .map_or(0, |tsc| tsc.saturating_sub(self.config.tsc_offset));
        self.current = Some((self.position, event));
        self.position += 1;
    }

    fn emit(&mut self) {
        let Some((position, event)) = &self.current else {
            return;
        };
        self.walked += 1;
        if self.config.quiet {
            return;
        }

        let line = match &self.config.prefix {
            Some(prefix) => format!("{prefix}: {position:016x}  {event}"),
            None => format!("{position:016x}  {event}"),
        };
        tracing::trace!(%line, "sideband record");
        self.lines.push(line);
    }
}

impl Observer for SidebandDumper {
    fn on_tick(&mut self, sub: &mut Subscription, _tick: Tick) -> ObserverResult<()> {
        let limit = sub.limit;
        loop {
            self.emit();
            self.setup(sub);
            if !sub.tick || limit < sub.limit {
                return Ok(());
            }
        }
    }
}
