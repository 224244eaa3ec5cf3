//! Process context correlation for a trace decoder.
//!
//! A [`SidebandCorrelator`] reads the perf records of one cpu in time order
//! and keeps the decoder's memory image in line with the process that runs.
//! It subscribes for ticks at the time of its next record. A context switch
//! is reported a little before or after it happens in the trace. The kernel
//! is mapped into every process, so when the trace contains ring 0 the switch
//! is held back until the decoder reaches a kernel address.

use std::sync::Arc;

use ipt_observer::{DecodeState, Observer, ObserverResult, Subscription, Tick};
use tracing::{debug, info, warn};

use crate::config::SidebandConfig;
use crate::context::SharedRegistry;
use crate::decoder::ImageSwitch;
use crate::error::{SidebandError, SidebandResult};
use crate::image::{ProcessContext, Section};
use crate::record::{AUX_FLAG_TRUNCATED, CpuMode, Mapping, SidebandEvent, SidebandRecord};

type Events = Box<dyn Iterator<Item = SidebandEvent>>;

/// Switches the decoder's image as processes come and go.
pub struct SidebandCorrelator {
    config: SidebandConfig,
    registry: SharedRegistry,
    events: Events,
    /// The next record to apply. Its time is the tick limit.
    event: Option<SidebandEvent>,
    decoder: Option<Box<dyn ImageSwitch>>,
    /// The context whose image the decoder uses.
    context: Option<Arc<ProcessContext>>,
    /// The context to switch to at the next kernel address.
    next_context: Option<Arc<ProcessContext>>,
    state: DecodeState,
}

impl SidebandCorrelator {
    /// Create a correlator over `events`.
    ///
    /// Reads ahead to the first relevant record and returns the subscription
    /// to register the correlator with. Without any, the subscription is
    /// empty.
    pub fn new<I>(
        config: SidebandConfig,
        registry: SharedRegistry,
        events: I,
    ) -> SidebandResult<(Self, Subscription)>
    where
        I: IntoIterator<Item = SidebandEvent>,
        I::IntoIter: 'static,
    {
        let mut correlator = Self {
            config,
            registry,
            events: Box::new(events.into_iter()),
            event: None,
            decoder: None,
            context: None,
            next_context: None,
            state: DecodeState::Unknown,
        };

        let mut subscription = Subscription::tick_at(0);
        correlator.setup(&mut subscription)?;
        Ok((correlator, subscription))
    }

    #[must_use]
    pub const fn config(&self) -> &SidebandConfig {
        &self.config
    }

    /// The context whose image the decoder uses.
    #[must_use]
    pub const fn context(&self) -> Option<&Arc<ProcessContext>> {
        self.context.as_ref()
    }

    /// The context waiting for the decoder to reach the kernel.
    #[must_use]
    pub const fn pending_context(&self) -> Option<&Arc<ProcessContext>> {
        self.next_context.as_ref()
    }

    #[must_use]
    pub const fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    /// Attach or detach the decoder whose image is switched.
    ///
    /// Without a decoder, the correlator only builds images and does not
    /// listen for state changes.
    pub fn set_decoder(
        &mut self,
        decoder: Option<Box<dyn ImageSwitch>>,
        subscription: &mut Subscription,
    ) {
        subscription.state = decoder.is_some();
        self.decoder = decoder;
    }

    /// Read ahead to the next record that needs applying.
    fn setup(&mut self, sub: &mut Subscription) -> SidebandResult<()> {
        self.event = None;

        for event in self.events.by_ref() {
            match &event.record {
                SidebandRecord::Lost { .. } => {
                    warn!("lost perf event records");
                    continue;
                }
                SidebandRecord::Aux { flags, .. } => {
                    if self.decoder.is_some() && flags & AUX_FLAG_TRUNCATED != 0 {
                        warn!("lost trace");
                    }
                    continue;
                }
                record if !record.is_relevant() => continue,
                _ => {}
            }

            let tsc = event
                .tsc
                .ok_or(SidebandError::BadConfig("sideband record without time sample"))?;
            sub.limit = tsc.saturating_sub(self.config.tsc_offset);
            self.event = Some(event);
            return Ok(());
        }

        debug!("sideband exhausted");
        sub.tick = false;
        Ok(())
    }

    fn apply(&mut self, sub: &mut Subscription) -> SidebandResult<()> {
        let Some(event) = self.event.take() else {
            return Ok(());
        };

        match &event.record {
            SidebandRecord::ItraceStart { pid, .. } => {
                if self.decoder.is_some() {
                    self.switch(*pid, sub)?;
                }
                Ok(())
            }
            SidebandRecord::Fork { pid, tid, ppid, .. } => self.fork(*pid, *tid, *ppid),
            SidebandRecord::Comm { pid, exec, .. } => {
                if *exec {
                    self.exec(*pid, sub)?;
                }
                Ok(())
            }
            SidebandRecord::Switch { out } => {
                if self.decoder.is_none() {
                    return Ok(());
                }
                let pid = event
                    .sample
                    .pid
                    .ok_or(SidebandError::BadConfig("context switch without pid sample"))?;
                if *out {
                    return Ok(());
                }
                self.switch(pid, sub)
            }
            SidebandRecord::SwitchCpuWide {
                out, next_prev_pid, ..
            } => {
                // The switch-out record names the next process; the switch-in
                // record repeats it.
                if self.decoder.is_none() || !*out {
                    return Ok(());
                }
                self.switch(*next_prev_pid, sub)
            }
            SidebandRecord::Mmap(mapping) | SidebandRecord::Mmap2 { mapping, .. } => {
                self.mmap(mapping, event.cpu_mode);
                Ok(())
            }
            _ => Err(SidebandError::Internal("unexpected sideband record")),
        }
    }

    fn pid_context(&self, pid: u32) -> Arc<ProcessContext> {
        let (context, created) = self.registry.lock().get_or_create(pid);
        if created && self.config.log_image {
            info!(image = context.name(), "image init");
        }
        context
    }

    fn switch_image(&mut self, next: Arc<ProcessContext>) -> SidebandResult<()> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(SidebandError::Internal("image switch without decoder"));
        };

        if self
            .context
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &next))
        {
            return Ok(());
        }

        if self.config.log_switch {
            info!(image = next.name(), "switch");
        }

        decoder
            .set_image(&next)
            .map_err(|source| SidebandError::Switch {
                image: next.name().to_owned(),
                source,
            })?;
        self.context = Some(next);
        Ok(())
    }

    fn clear_next_context(&mut self, sub: &mut Subscription) {
        self.next_context = None;
        sub.ip = false;
    }

    fn switch_context(
        &mut self,
        context: Arc<ProcessContext>,
        sub: &mut Subscription,
    ) -> SidebandResult<()> {
        if self.decoder.is_none() {
            return Err(SidebandError::Internal("context switch without decoder"));
        }

        self.clear_next_context(sub);

        if self.config.ring_0 {
            // Decode has not started; nothing to wait for.
            if self.state == DecodeState::Unknown {
                return self.switch_image(context);
            }

            self.next_context = Some(context);
            sub.ip = true;
            return Ok(());
        }

        // Without the kernel, a user trace only continues in the new
        // process after tracing was disabled and enabled again.
        if self.state == DecodeState::Enabled && self.config.ring_3 {
            self.next_context = Some(context);
            return Ok(());
        }

        self.switch_image(context)
    }

    fn switch(&mut self, pid: u32, sub: &mut Subscription) -> SidebandResult<()> {
        let context = self.pid_context(pid);
        self.switch_context(context, sub)
    }

    fn fork(&mut self, pid: u32, tid: u32, ppid: u32) -> SidebandResult<()> {
        // A new process reuses a pid whose previous owner is gone.
        if pid == tid {
            let old = self.registry.lock().remove_by_pid(pid);
            if let Some(old) = old.filter(|_| self.config.log_image) {
                info!(image = old.name(), "exit");
            }
        }

        let context = self.pid_context(pid);
        if pid == ppid {
            return Ok(());
        }

        let Some(parent) = self.registry.lock().by_pid(ppid) else {
            return Ok(());
        };
        if Arc::ptr_eq(&parent, &context) {
            return Err(SidebandError::SelfFork(pid));
        }

        if self.config.log_image {
            info!(image = context.name(), parent = parent.name(), "image init");
        }
        context.copy_image_from(&parent);
        Ok(())
    }

    fn exec(&mut self, pid: u32, sub: &mut Subscription) -> SidebandResult<()> {
        let old = self.registry.lock().remove_by_pid(pid);
        if let Some(old) = old.filter(|_| self.config.log_image) {
            info!(image = old.name(), "exec");
        }

        let context = self.pid_context(pid);
        if self.decoder.is_none() {
            return Ok(());
        }
        self.switch_context(context, sub)
    }

    fn mmap(&self, mapping: &Mapping, cpu_mode: CpuMode) {
        // Kernel modules belong to the kernel image.
        if cpu_mode == CpuMode::Kernel {
            return;
        }

        let context = self.pid_context(mapping.pid);
        let Some(filename) = self.resolve(&mapping.filename) else {
            if self.config.log_image {
                info!(
                    image = context.name(),
                    filename = %mapping.filename,
                    vaddr = mapping.addr,
                    "ignored"
                );
            }
            return;
        };

        if self.config.log_image {
            info!(
                image = context.name(),
                %filename,
                offset = mapping.pgoff,
                size = mapping.len,
                vaddr = mapping.addr,
                "add"
            );
        }

        context.add_section(Section {
            filename,
            offset: mapping.pgoff,
            size: mapping.len,
            vaddr: mapping.addr,
        });
    }

    /// The file backing a mapping, or `None` if there is nothing to load.
    fn resolve(&self, filename: &str) -> Option<String> {
        if filename == "[vdso]" {
            return self.config.vdso.clone();
        }

        if filename.starts_with('[')
            || filename == "//anon"
            || filename.contains(" (deleted)")
        {
            return None;
        }

        match &self.config.sysroot {
            Some(sysroot) => Some(format!("{sysroot}{filename}")),
            None => Some(filename.to_owned()),
        }
    }
}

impl Observer for SidebandCorrelator {
    fn on_tick(&mut self, sub: &mut Subscription, _tick: Tick) -> ObserverResult<()> {
        // Apply every record with the current time. Later records get their
        // own notification once the decoder reaches them.
        let limit = sub.limit;
        loop {
            if let Err(error) = self.apply(sub) {
                warn!(%error, "dropping sideband event");
            }

            self.setup(sub)?;
            if !sub.tick || limit < sub.limit {
                return Ok(());
            }
        }
    }

    fn on_state(&mut self, sub: &mut Subscription, state: DecodeState) -> ObserverResult<()> {
        self.state = state;

        let Some(next) = self.next_context.clone() else {
            return Ok(());
        };

        match state {
            DecodeState::Enabled => return Ok(()),
            DecodeState::Disabled if self.config.ring_0 => return Ok(()),
            DecodeState::Disabled | DecodeState::Unknown => {}
        }

        self.switch_image(next)?;
        self.clear_next_context(sub);
        Ok(())
    }

    fn on_ip(&mut self, sub: &mut Subscription, ip: u64) -> ObserverResult<()> {
        if ip < self.config.kernel_start {
            return Ok(());
        }

        if !self.config.ring_0 {
            return Err(SidebandError::Internal("kernel ip without ring 0").into());
        }
        let Some(next) = self.next_context.clone() else {
            return Err(SidebandError::Internal("kernel ip without pending switch").into());
        };

        self.switch_image(next)?;
        self.clear_next_context(sub);
        Ok(())
    }
}
