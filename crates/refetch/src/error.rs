use std::time::Duration;

use thiserror::Error;

/// An error that ends (or interrupts) a fetch or mutation.
///
/// The variant doubles as the retry classification: [`Transient`](Self::Transient)
/// and [`Timeout`](Self::Timeout) failures feed the retry controller, all other
/// variants settle the operation immediately. Loaders that can tell
/// validation- or permission-class failures apart should construct
/// [`Terminal`](Self::Terminal) themselves; foreign errors convert to
/// [`Transient`](Self::Transient) by default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// A retryable failure, like connection loss or a 5xx server response.
    ///
    /// The attached string contains the underlying error message.
    #[error("transient failure: {0}")]
    Transient(String),
    /// A single attempt did not complete within its configured time budget.
    ///
    /// Timeouts are classified as transient and are retried.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    /// A non-retryable failure, like a validation error or missing
    /// permissions.
    ///
    /// The attached string contains the underlying error message.
    #[error("terminal failure: {0}")]
    Terminal(String),
    /// The operation used up its whole attempt budget.
    ///
    /// Wraps the transient error of the final attempt.
    #[error("{attempts} attempts exhausted, last error: {last}")]
    AttemptsExhausted {
        /// Number of attempts that were made, including the first.
        attempts: u32,
        /// The transient error the final attempt failed with.
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether the retry controller may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    /// Converts a foreign error, classifying it as transient.
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::debug!(error = dynerr, "classifying foreign error as transient");
        Self::Transient(e.to_string())
    }
}

impl From<std::io::Error> for FetchError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

/// The settled outcome of a fetch or mutation, either `Ok(T)` or the error
/// that ended the operation.
pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(FetchError::Transient("connection reset".into()).is_retryable());
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!FetchError::Terminal("permission denied".into()).is_retryable());
        assert!(
            !FetchError::AttemptsExhausted {
                attempts: 3,
                last: Box::new(FetchError::Transient("connection reset".into())),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_display() {
        let err = FetchError::AttemptsExhausted {
            attempts: 3,
            last: Box::new(FetchError::Transient("connection reset".into())),
        };
        assert_eq!(
            err.to_string(),
            "3 attempts exhausted, last error: transient failure: connection reset"
        );
        assert_eq!(
            FetchError::Timeout(Duration::from_millis(250)).to_string(),
            "attempt timed out after 250ms"
        );
    }

    #[test]
    fn test_default_classification() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        assert_eq!(
            FetchError::from(err),
            FetchError::Transient("connection reset".into())
        );
    }
}
