//! Sideband error types.

use ipt_observer::{CallbackError, ObserverError};
use thiserror::Error;

/// Sideband error type.
#[derive(Debug, Error)]
pub enum SidebandError {
    /// A record lacks a sample the configuration promised.
    #[error("bad config: {0}")]
    BadConfig(&'static str),

    /// The correlator reached a state it cannot be in.
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// Parent and child of a fork share a context.
    #[error("fork of {0:x} into itself")]
    SelfFork(u32),

    /// The decoder refused an image.
    #[error("failed to switch to image {image}")]
    Switch {
        image: String,
        #[source]
        source: CallbackError,
    },
}

impl SidebandError {
    /// Check whether the error comes from a missing sample.
    #[must_use]
    pub const fn is_bad_config(&self) -> bool {
        matches!(self, Self::BadConfig(_))
    }
}

impl From<SidebandError> for ObserverError {
    fn from(error: SidebandError) -> Self {
        Self::callback(error)
    }
}

/// Result type for sideband operations.
pub type SidebandResult<T> = Result<T, SidebandError>;
