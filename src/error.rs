//! Engine-level errors.

use crate::storage::StoreError;
use std::fmt;

#[derive(Debug)]
pub enum StatsError {
    /// The unit store could not be opened.
    Storage(StoreError),
    /// Retention interval outside the supported set.
    InvalidInterval(u32),
    /// Rotation is enabled with a zero poll interval.
    InvalidPollInterval,
    /// Rotation is enabled but no tokio runtime is running.
    NoRuntime,
    /// The aggregated window does not have one record per retained hour.
    WindowMismatch { expected: usize, actual: usize },
}

impl From<StoreError> for StatsError {
    fn from(err: StoreError) -> Self {
        StatsError::Storage(err)
    }
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsError::Storage(e) => write!(f, "Storage error: {}", e),
            StatsError::InvalidInterval(days) => write!(f, "Unsupported interval: {} days", days),
            StatsError::InvalidPollInterval => write!(f, "Rotation poll interval must be non-zero"),
            StatsError::NoRuntime => write!(f, "Rotation requires a running tokio runtime"),
            StatsError::WindowMismatch { expected, actual } => write!(
                f,
                "Aggregated window has {} units, expected {}",
                actual, expected
            ),
        }
    }
}

impl std::error::Error for StatsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatsError::Storage(e) => Some(e),
            _ => None,
        }
    }
}
