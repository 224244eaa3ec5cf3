//! Time error types.

use ipt_observer::ObserverError;
use thiserror::Error;

/// Time error type.
#[derive(Debug, Error)]
pub enum TimeError {
    /// No TSC was seen yet.
    #[error("no time information")]
    NoTime,

    /// No core:bus ratio was seen yet.
    #[error("no core:bus ratio")]
    NoCbr,

    /// A time tracker needs a non-zero period.
    #[error("invalid tracking period: {0}")]
    InvalidPeriod(u64),

    /// Notifying tick observers failed.
    #[error(transparent)]
    Observer(#[from] ObserverError),
}

impl From<TimeError> for ObserverError {
    fn from(error: TimeError) -> Self {
        match error {
            TimeError::Observer(inner) => inner,
            other => Self::callback(other),
        }
    }
}

/// Result type for time operations.
pub type TimeResult<T> = Result<T, TimeError>;
