//! Engine configuration.

use crate::error::StatsError;
use crate::rotation::RotationConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Retention intervals (days) accepted from the control plane.
pub const SUPPORTED_INTERVALS: [u32; 4] = [1, 7, 30, 90];

/// Whether `days` is one of the supported retention intervals.
pub fn is_valid_interval(days: u32) -> bool {
    SUPPORTED_INTERVALS.contains(&days)
}

/// Configuration for the statistics engine.
#[derive(Debug, Clone)]
pub struct StatsConfig {
    /// Path to the unit database (SQLite)
    pub db_path: PathBuf,

    /// Retention window in days
    pub interval_days: u32,

    /// Background rotation settings
    pub rotation: RotationConfig,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./var/data/stats.db"),
            interval_days: 1,
            rotation: RotationConfig::default(),
        }
    }
}

impl StatsConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `STATS_DB_PATH` (default: ./var/data/stats.db)
    /// - `STATS_INTERVAL_DAYS` (default: 1)
    /// - `STATS_POLL_INTERVAL_MS` (default: 1000)
    /// - `STATS_ROTATION_ENABLED` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            db_path: env::var("STATS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),

            interval_days: env::var("STATS_INTERVAL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.interval_days),

            rotation: RotationConfig {
                poll_interval: env::var("STATS_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.rotation.poll_interval),
                enabled: env::var("STATS_ROTATION_ENABLED")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(defaults.rotation.enabled),
            },
        }
    }

    /// Validate the configuration before opening an engine.
    ///
    /// # Errors
    /// - `StatsError::InvalidInterval` if `interval_days` is not one of
    ///   [`SUPPORTED_INTERVALS`]
    /// - `StatsError::InvalidPollInterval` if rotation is enabled with a zero
    ///   poll interval
    pub fn validate(&self) -> Result<(), StatsError> {
        if !is_valid_interval(self.interval_days) {
            return Err(StatsError::InvalidInterval(self.interval_days));
        }
        if self.rotation.enabled && self.rotation.poll_interval.is_zero() {
            return Err(StatsError::InvalidPollInterval);
        }
        Ok(())
    }

    /// Retention window in hours, saturating at `u32::MAX`.
    pub fn limit_hours(&self) -> u32 {
        self.interval_days.saturating_mul(24)
    }
}
