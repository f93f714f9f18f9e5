//! Background rotation task.
//!
//! Runs as a tokio task spawned when the engine opens. The task holds only a
//! weak reference to the engine and a shutdown receiver, so it stops when the
//! engine is closed or dropped. Storage work runs on the blocking pool.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::engine::StatsEngine;
use crate::error::StatsError;
use log::{debug, error, info};

/// Configuration for the rotation task.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// How often to check whether the hour changed
    pub poll_interval: Duration,
    /// Whether the task is started at all
    pub enabled: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            enabled: true,
        }
    }
}

/// Polls for hour boundaries and triggers unit rotation.
pub struct RotationScheduler {
    engine: Weak<StatsEngine>,
    config: RotationConfig,
    shutdown: watch::Receiver<bool>,
}

impl RotationScheduler {
    /// Create a scheduler for `engine`.
    ///
    /// # Arguments
    /// * `engine` - Engine to rotate; the task stops once it is dropped
    /// * `config` - Poll interval and enable flag
    /// * `shutdown` - Receiver from [`StatsEngine::subscribe_shutdown`]
    pub fn new(
        engine: Weak<StatsEngine>,
        config: RotationConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            config,
            shutdown,
        }
    }

    /// Spawn the rotation task for `engine` on the current tokio runtime.
    ///
    /// # Returns
    /// Handle of the spawned task. It completes after the engine is closed.
    ///
    /// # Errors
    /// - `StatsError::InvalidPollInterval` for a zero poll interval
    /// - `StatsError::NoRuntime` when called outside a tokio runtime
    pub fn spawn(
        engine: &Arc<StatsEngine>,
        config: RotationConfig,
    ) -> Result<JoinHandle<()>, StatsError> {
        if config.poll_interval.is_zero() {
            return Err(StatsError::InvalidPollInterval);
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| StatsError::NoRuntime)?;
        let scheduler = Self::new(Arc::downgrade(engine), config, engine.subscribe_shutdown());
        Ok(handle.spawn(scheduler.run()))
    }

    /// Poll until the engine shuts down.
    ///
    /// A failed flush is not retried for the retired unit; later ticks only
    /// rotate again once the hour changes.
    pub async fn run(mut self) {
        if !self.config.enabled {
            info!("Stats: rotation is disabled, skipping");
            return;
        }
        if self.config.poll_interval.is_zero() {
            error!("Stats: rotation poll interval is zero, not starting");
            return;
        }

        debug!(
            "Stats: rotation started with {}ms poll interval",
            self.config.poll_interval.as_millis()
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let Some(engine) = self.engine.upgrade() else {
                break;
            };
            if engine.is_closed() {
                break;
            }

            match tokio::task::spawn_blocking(move || engine.rotate_if_needed()).await {
                Ok(true) => debug!("Stats: rotated to a new unit"),
                Ok(false) => {}
                Err(e) => error!("Stats: rotation task failed: {}", e),
            }
        }

        debug!("Stats: rotation stopped");
    }
}
