#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]

//! Perf-event sideband for observer-driven trace decoders.
//!
//! Sideband records describe what the trace alone does not show: which
//! process runs and which files it mapped. Two tick observers consume them
//! in trace time:
//!
//! - [`SidebandCorrelator`] keeps per-process memory images and switches the
//!   decoder to the image of the running process.
//! - [`SidebandDumper`] lists the records between the trace packets.
//!
//! Correlators of different cpus share one [`ContextRegistry`].

mod config;
mod context;
mod correlator;
mod decoder;
mod dumper;
mod error;
mod image;
mod record;

pub use config::{DEFAULT_KERNEL_START, DumperConfig, SidebandConfig};
pub use context::{ContextRegistry, SharedRegistry};
pub use correlator::SidebandCorrelator;
pub use decoder::ImageSwitch;
pub use dumper::SidebandDumper;
pub use error::{SidebandError, SidebandResult};
pub use image::{Image, ProcessContext, Section};
pub use record::{
    AUX_FLAG_TRUNCATED, CpuMode, Mapping, Sample, SidebandEvent, SidebandRecord,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ContextRegistry, ImageSwitch, SidebandConfig, SidebandCorrelator, SidebandDumper,
        SidebandEvent, SidebandRecord,
    };
}
