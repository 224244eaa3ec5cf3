//! Observer dispatch error types.

use thiserror::Error;

use crate::ObserverId;

/// Boxed error returned by an observer callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad classification of an [`ObserverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The collection itself is inconsistent. Always a bug.
    ContractViolation,
    /// The caller or an observer misused the collection.
    InvalidUsage,
    /// An observer callback failed.
    Callback,
}

/// Observer dispatch error type.
#[derive(Debug, Error)]
pub enum ObserverError {
    /// Internal queue or arena state is inconsistent.
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// The collection was used in a way it does not support.
    #[error("invalid usage: {0}")]
    Invalid(&'static str),

    /// The handle does not name a live observer.
    #[error("unknown observer: {0:?}")]
    UnknownObserver(ObserverId),

    /// The observer is already on one of the queues.
    #[error("observer already registered: {0:?}")]
    AlreadyRegistered(ObserverId),

    /// An observer callback failed; the error is passed through unchanged.
    #[error(transparent)]
    Callback(CallbackError),
}

impl ObserverError {
    /// Wrap an observer's own error.
    pub fn callback<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Callback(Box::new(error))
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Internal(_) => ErrorKind::ContractViolation,
            Self::Invalid(_) | Self::UnknownObserver(_) | Self::AlreadyRegistered(_) => {
                ErrorKind::InvalidUsage
            }
            Self::Callback(_) => ErrorKind::Callback,
        }
    }

    /// Recover the concrete error of a failed callback.
    #[must_use]
    pub fn callback_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Callback(error) => error.downcast_ref(),
            _ => None,
        }
    }
}

/// Result type for observer operations.
pub type ObserverResult<T> = Result<T, ObserverError>;

/// Keep the first error of a sequence of fallible steps.
///
/// Later errors are logged and dropped.
pub(crate) fn keep_first(status: &mut ObserverResult<()>, next: ObserverResult<()>) {
    if let Err(error) = next {
        if status.is_ok() {
            *status = Err(error);
        } else {
            tracing::warn!(%error, "superseded by an earlier observer error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("bad config")]
    struct BadConfig;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ObserverError::Internal("x").kind(),
            ErrorKind::ContractViolation
        );
        assert_eq!(ObserverError::Invalid("x").kind(), ErrorKind::InvalidUsage);
        assert_eq!(
            ObserverError::callback(BadConfig).kind(),
            ErrorKind::Callback
        );
    }

    #[test]
    fn test_callback_passthrough() {
        let error = ObserverError::callback(BadConfig);
        assert!(error.callback_ref::<BadConfig>().is_some());
        assert_eq!(error.to_string(), "bad config");
        assert!(
            ObserverError::Invalid("x")
                .callback_ref::<BadConfig>()
                .is_none()
        );
    }

    #[test]
    fn test_keep_first() {
        let mut status = Ok(());
        keep_first(&mut status, Ok(()));
        assert!(status.is_ok());

        keep_first(&mut status, Err(ObserverError::callback(BadConfig)));
        keep_first(&mut status, Err(ObserverError::Internal("later")));
        assert!(status.unwrap_err().callback_ref::<BadConfig>().is_some());
    }
}
