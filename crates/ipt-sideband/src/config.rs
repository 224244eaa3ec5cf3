//! Sideband configuration.

use serde::{Deserialize, Serialize};

/// The start of the kernel half of the address space on 64-bit Linux.
pub const DEFAULT_KERNEL_START: u64 = 0xffff_8000_0000_0000;

/// Correlator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidebandConfig {
    /// Instruction pointers at or above this address are kernel addresses.
    pub kernel_start: u64,
    /// Subtracted from every record time before it becomes a tick limit.
    pub tsc_offset: u64,
    /// The trace contains ring 0.
    pub ring_0: bool,
    /// The trace contains ring 3.
    pub ring_3: bool,
    /// The file to map for `[vdso]`. Without one, vdso mappings are dropped.
    pub vdso: Option<String>,
    /// Prepended to every mapped filename.
    pub sysroot: Option<String>,
    /// Log image creation and section changes.
    pub log_image: bool,
    /// Log image switches.
    pub log_switch: bool,
}

impl Default for SidebandConfig {
    fn default() -> Self {
        Self {
            kernel_start: DEFAULT_KERNEL_START,
            tsc_offset: 0,
            ring_0: true,
            ring_3: true,
            vdso: None,
            sysroot: None,
            log_image: false,
            log_switch: false,
        }
    }
}

impl SidebandConfig {
    #[must_use]
    pub const fn with_kernel_start(mut self, kernel_start: u64) -> Self {
        self.kernel_start = kernel_start;
        self
    }

    #[must_use]
    pub const fn with_tsc_offset(mut self, tsc_offset: u64) -> Self {
        self.tsc_offset = tsc_offset;
        self
    }

    #[must_use]
    pub const fn with_rings(mut self, ring_0: bool, ring_3: bool) -> Self {
        self.ring_0 = ring_0;
        self.ring_3 = ring_3;
        self
    }

    #[must_use]
    pub fn with_vdso(mut self, vdso: impl Into<String>) -> Self {
        self.vdso = Some(vdso.into());
        self
    }

    #[must_use]
    pub fn with_sysroot(mut self, sysroot: impl Into<String>) -> Self {
        self.sysroot = Some(sysroot.into());
        self
    }

    #[must_use]
    pub const fn with_logging(mut self, log_image: bool, log_switch: bool) -> Self {
        self.log_image = log_image;
        self.log_switch = log_switch;
        self
    }
}

/// Dumper configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DumperConfig {
    /// Subtracted from every record time before it becomes a tick limit.
    pub tsc_offset: u64,
    /// Walk the records without printing them.
    pub quiet: bool,
    /// Prepended to every printed line.
    pub prefix: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SidebandConfig::default();
        assert!(config.ring_0 && config.ring_3);
        assert_eq!(config.kernel_start, DEFAULT_KERNEL_START);
        assert_eq!(config.vdso, None);
    }

    #[test]
    fn test_config_from_json() {
        let config: SidebandConfig = serde_json::from_str(
            r#"{ "ring_0": false, "tsc_offset": 16, "sysroot": "/sysroot" }"#,
        )
        .unwrap();

        assert_eq!(
            config,
            SidebandConfig::default()
                .with_rings(false, true)
                .with_tsc_offset(16)
                .with_sysroot("/sysroot")
        );
    }

    #[test]
    fn test_dumper_config_from_json() {
        let config: DumperConfig = serde_json::from_str(r#"{ "quiet": true }"#).unwrap();
        assert!(config.quiet);
        assert_eq!(config.prefix, None);
    }
}
