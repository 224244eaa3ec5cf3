//! Perf-event sideband records.
//!
//! Records arrive already parsed, with the perf timestamp converted to trace
//! time. Any serde source works; the binary perf format is not read here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `PERF_AUX_FLAG_TRUNCATED`: the trace buffer overflowed.
pub const AUX_FLAG_TRUNCATED: u64 = 0x01;

/// The cpu mode bits of a record's misc field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuMode {
    #[default]
    Unknown,
    Kernel,
    User,
    Hypervisor,
    GuestKernel,
    GuestUser,
}

impl CpuMode {
    /// Decode `PERF_RECORD_MISC_CPUMODE_MASK` bits.
    #[must_use]
    pub const fn from_misc(misc: u16) -> Self {
        match misc & 0x7 {
            1 => Self::Kernel,
            2 => Self::User,
            3 => Self::Hypervisor,
            4 => Self::GuestKernel,
            5 => Self::GuestUser,
            _ => Self::Unknown,
        }
    }
}

/// Samples attached to a record by `perf_event_attr::sample_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Sample {
    pub pid: Option<u32>,
    pub tid: Option<u32>,
    pub id: Option<u64>,
    pub stream_id: Option<u64>,
    pub cpu: Option<u32>,
    pub identifier: Option<u64>,
}

/// An address range mapped from a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mapping {
    pub pid: u32,
    pub tid: u32,
    pub addr: u64,
    pub len: u64,
    pub pgoff: u64,
    pub filename: String,
}

/// The payload of a sideband event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidebandRecord {
    ItraceStart {
        pid: u32,
        tid: u32,
    },
    Fork {
        pid: u32,
        ppid: u32,
        tid: u32,
        ptid: u32,
        time: u64,
    },
    Exit {
        pid: u32,
        ppid: u32,
        tid: u32,
        ptid: u32,
        time: u64,
    },
    Comm {
        pid: u32,
        tid: u32,
        comm: String,
        /// `PERF_RECORD_MISC_COMM_EXEC`
        #[serde(default)]
        exec: bool,
    },
    Switch {
        /// `PERF_RECORD_MISC_SWITCH_OUT`
        out: bool,
    },
    SwitchCpuWide {
        out: bool,
        next_prev_pid: u32,
        next_prev_tid: u32,
    },
    Mmap(Mapping),
    Mmap2 {
        #[serde(flatten)]
        mapping: Mapping,
        maj: u32,
        min: u32,
        ino: u64,
        ino_generation: u64,
        prot: u32,
        flags: u32,
    },
    Lost {
        id: u64,
        lost: u64,
    },
    LostSamples {
        lost: u64,
    },
    Throttle {
        time: u64,
        id: u64,
        stream_id: u64,
    },
    Unthrottle {
        time: u64,
        id: u64,
        stream_id: u64,
    },
    Aux {
        aux_offset: u64,
        aux_size: u64,
        flags: u64,
    },
    Unknown {
        kind: u32,
        misc: u16,
    },
}

impl SidebandRecord {
    /// The perf name of the record, with its misc flavor.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ItraceStart { .. } => "PERF_RECORD_ITRACE_START",
            Self::Fork { .. } => "PERF_RECORD_FORK",
            Self::Exit { .. } => "PERF_RECORD_EXIT",
            Self::Comm { exec: true, .. } => "PERF_RECORD_COMM.EXEC",
            Self::Comm { .. } => "PERF_RECORD_COMM",
            Self::Switch { out: true } => "PERF_RECORD_SWITCH.OUT",
            Self::Switch { out: false } => "PERF_RECORD_SWITCH.IN",
            Self::SwitchCpuWide { out: true, .. } => "PERF_RECORD_SWITCH_CPU_WIDE.OUT",
            Self::SwitchCpuWide { .. } => "PERF_RECORD_SWITCH_CPU_WIDE.IN",
            Self::Mmap(_) => "PERF_RECORD_MMAP",
            Self::Mmap2 { .. } => "PERF_RECORD_MMAP2",
            Self::Lost { .. } => "PERF_RECORD_LOST",
            Self::LostSamples { .. } => "PERF_RECORD_LOST_SAMPLES",
            Self::Throttle { .. } => "PERF_RECORD_THROTTLE",
            Self::Unthrottle { .. } => "PERF_RECORD_UNTHROTTLE",
            Self::Aux { flags, .. } if *flags & AUX_FLAG_TRUNCATED != 0 => {
                "PERF_RECORD_AUX.TRUNCATED"
            }
            Self::Aux { .. } => "PERF_RECORD_AUX",
            Self::Unknown { .. } => "UNKNOWN",
        }
    }

    /// Check whether the record changes process images or contexts.
    #[must_use]
    pub const fn is_relevant(&self) -> bool {
        matches!(
            self,
            Self::ItraceStart { .. }
                | Self::Fork { .. }
                | Self::Comm { .. }
                | Self::Switch { .. }
                | Self::SwitchCpuWide { .. }
                | Self::Mmap(_)
                | Self::Mmap2 { .. }
        )
    }

    /// The mapping of an mmap record.
    #[must_use]
    pub const fn mapping(&self) -> Option<&Mapping> {
        match self {
            Self::Mmap(mapping) | Self::Mmap2 { mapping, .. } => Some(mapping),
            _ => None,
        }
    }
}

/// A sideband event: a record with its samples.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SidebandEvent {
    /// The time sample in trace time, if the record has one.
    #[serde(default)]
    pub tsc: Option<u64>,
    #[serde(default)]
    pub cpu_mode: CpuMode,
    #[serde(default)]
    pub sample: Sample,
    pub record: SidebandRecord,
}

impl SidebandEvent {
    #[must_use]
    pub fn new(record: SidebandRecord) -> Self {
        Self {
            tsc: None,
            cpu_mode: CpuMode::default(),
            sample: Sample::default(),
            record,
        }
    }

    #[must_use]
    pub const fn at(mut self, tsc: u64) -> Self {
        self.tsc = Some(tsc);
        self
    }

    #[must_use]
    pub const fn with_cpu_mode(mut self, cpu_mode: CpuMode) -> Self {
        self.cpu_mode = cpu_mode;
        self
    }

    #[must_use]
    pub const fn with_pid(mut self, pid: u32, tid: u32) -> Self {
        self.sample.pid = Some(pid);
        self.sample.tid = Some(tid);
        self
    }
}

impl fmt::Display for SidebandEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.record.name())?;
        if let Some(tsc) = self.tsc {
            write!(f, " [{tsc:x}]")?;
        }

        match &self.record {
            SidebandRecord::ItraceStart { pid, tid } => write!(f, "  {pid:x}/{tid:x}")?,
            SidebandRecord::Fork {
                pid,
                ppid,
                tid,
                ptid,
                time,
            }
            | SidebandRecord::Exit {
                pid,
                ppid,
                tid,
                ptid,
                time,
            } => write!(f, "  {pid:x}/{tid:x}, {ppid:x}/{ptid:x}, {time:x}")?,
            SidebandRecord::Comm { pid, tid, comm, .. } => write!(f, "  {pid:x}/{tid:x}, {comm}")?,
            SidebandRecord::Switch { .. } => {}
            SidebandRecord::SwitchCpuWide {
                next_prev_pid,
                next_prev_tid,
                ..
            } => write!(f, "  {next_prev_pid:x}/{next_prev_tid:x}")?,
            SidebandRecord::Mmap(m) => write!(
                f,
                "  {:x}/{:x}, {:x}, {:x}, {:x}, {}",
                m.pid, m.tid, m.addr, m.len, m.pgoff, m.filename
            )?,
            SidebandRecord::Mmap2 {
                mapping: m,
                maj,
                min,
                ino,
                ino_generation,
                prot,
                flags,
            } => write!(
                f,
                "  {:x}/{:x}, {:x}, {:x}, {:x}, {maj:x}, {min:x}, {ino:x}, {ino_generation:x}, {prot:x}, {flags:x}, {}",
                m.pid, m.tid, m.addr, m.len, m.pgoff, m.filename
            )?,
            SidebandRecord::Lost { id, lost } => write!(f, "  {id:x}, {lost:x}")?,
            SidebandRecord::LostSamples { lost } => write!(f, "  {lost:x}")?,
            SidebandRecord::Throttle {
                time,
                id,
                stream_id,
            }
            | SidebandRecord::Unthrottle {
                time,
                id,
                stream_id,
            } => write!(f, "  {time:x}, {id:x}, {stream_id:x}")?,
            SidebandRecord::Aux {
                aux_offset,
                aux_size,
                flags,
            } => write!(f, "  {aux_offset:x}, {aux_size:x}, {flags:x}")?,
            SidebandRecord::Unknown { kind, misc } => write!(f, " ({kind:x}, {misc:x})")?,
        }

        let sample = &self.sample;
        if let (Some(pid), Some(tid)) = (sample.pid, sample.tid) {
            write!(f, "  {{ {pid:x}/{tid:x} }}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_mode_from_misc() {
        assert_eq!(CpuMode::from_misc(0x2001), CpuMode::Kernel);
        assert_eq!(CpuMode::from_misc(0x0002), CpuMode::User);
        assert_eq!(CpuMode::from_misc(0x0007), CpuMode::Unknown);
    }

    #[test]
    fn test_record_names() {
        let exec = SidebandRecord::Comm {
            pid: 1,
            tid: 1,
            comm: "ls".into(),
            exec: true,
        };
        assert_eq!(exec.name(), "PERF_RECORD_COMM.EXEC");

        let aux = SidebandRecord::Aux {
            aux_offset: 0,
            aux_size: 0x1000,
            flags: AUX_FLAG_TRUNCATED,
        };
        assert_eq!(aux.name(), "PERF_RECORD_AUX.TRUNCATED");
        assert!(!aux.is_relevant());
        assert!(exec.is_relevant());
    }

    #[test]
    fn test_display_compact() {
        let event = SidebandEvent::new(SidebandRecord::Mmap(Mapping {
            pid: 0x10,
            tid: 0x11,
            addr: 0x40_0000,
            len: 0x1000,
            pgoff: 0,
            filename: "/bin/ls".into(),
        }))
        .at(0x20)
        .with_pid(0x10, 0x11);

        assert_eq!(
            event.to_string(),
            "PERF_RECORD_MMAP [20]  10/11, 400000, 1000, 0, /bin/ls  { 10/11 }"
        );
    }

    #[test]
    fn test_event_from_json() {
        let event: SidebandEvent = serde_json::from_str(
            r#"{
                "tsc": 256,
                "sample": { "pid": 7, "tid": 7 },
                "record": { "switch_cpu_wide": { "out": true, "next_prev_pid": 9, "next_prev_tid": 10 } }
            }"#,
        )
        .unwrap();

        assert_eq!(event.tsc, Some(256));
        assert_eq!(event.cpu_mode, CpuMode::Unknown);
        assert_eq!(event.sample.pid, Some(7));
        assert_eq!(event.record.name(), "PERF_RECORD_SWITCH_CPU_WIDE.OUT");
    }
}
