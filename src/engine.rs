//! Statistics engine - owns the unit store, the live unit and retention.
//!
//! # Lifecycle
//! - [`StatsEngine::open`] opens the store, purges stale units, resumes the
//!   current hour if it was already flushed, and spawns the rotation task
//! - [`StatsEngine::ingest`] folds events into the live unit
//! - [`StatsEngine::query`] aggregates stored units plus the live unit
//! - [`StatsEngine::close`] retires the live unit, flushes it and closes the store
//!
//! # Thread Safety
//! One mutex guards the live unit. `ingest` holds it only for in-memory
//! updates; `query` holds it only to snapshot the live unit. Store reads and
//! writes happen outside of it, serialized by the store itself.
//!
//! Rotation, `clear` and `close` also take a lifecycle lock for their whole
//! run, so a unit retired before a clear is never written into the freshly
//! reset store. Lock order: lifecycle, then live unit, then store.

use crate::aggregate::{build_report, load_stored, StatsReport, UnitWindow};
use crate::config::StatsConfig;
use crate::error::StatsError;
use crate::rotation::RotationScheduler;
use crate::storage::{StoreTxn, Unit, UnitStore};
use crate::types::{Event, SystemClock, TimeUnit, UnitClock, UnitId};
use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

pub struct StatsEngine {
    /// Retention window in hours
    limit: AtomicU32,
    store: UnitStore,
    /// Live unit; `None` once the engine is closed
    unit: Mutex<Option<Unit>>,
    clock: Arc<dyn UnitClock>,
    shutdown: watch::Sender<bool>,
    /// Serializes rotation, clear and close
    lifecycle: Mutex<()>,
}

impl std::fmt::Debug for StatsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsEngine")
            .field("limit_hours", &self.limit_hours())
            .field("store", &self.store)
            .field("unit_id", &self.current_unit_id())
            .finish()
    }
}

impl StatsEngine {
    /// Open the engine using wall-clock hours.
    pub fn open(config: StatsConfig) -> Result<Arc<Self>, StatsError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open the engine with a custom unit clock.
    ///
    /// # Errors
    /// - `StatsError::Storage` if the database cannot be opened
    /// - `StatsError::NoRuntime` if rotation is enabled outside a tokio runtime
    /// - `StatsError::InvalidPollInterval` if rotation is enabled with a zero
    ///   poll interval
    pub fn open_with_clock(
        config: StatsConfig,
        clock: Arc<dyn UnitClock>,
    ) -> Result<Arc<Self>, StatsError> {
        let store = UnitStore::open(&config.db_path).map_err(|e| {
            error!("Stats: open DB: {}: {}", config.db_path.display(), e);
            e
        })?;

        let id = clock.unit_id();
        let limit = config.limit_hours();
        let mut unit = Unit::new(id);

        if let Some(tx) = store.begin(true) {
            trace!("Stats: deleting old units");
            let deleted = purge_before(&tx, id - limit as UnitId - 1);

            let stored = match tx.get(id) {
                Ok(stored) => stored,
                Err(e) => {
                    error!("Stats: load unit {}: {}", id, e);
                    None
                }
            };

            if deleted != 0 {
                if let Err(e) = tx.commit() {
                    error!("tx.Commit: {}", e);
                }
            } else {
                tx.rollback();
            }

            if let Some(record) = stored {
                debug!("Stats: resuming unit {} ({} queries)", id, record.n_total);
                unit = Unit::from_record(id, &record);
            }
        }

        let (shutdown, _) = watch::channel(false);
        let engine = Arc::new(Self {
            limit: AtomicU32::new(limit),
            store,
            unit: Mutex::new(Some(unit)),
            clock,
            shutdown,
            lifecycle: Mutex::new(()),
        });

        if config.rotation.enabled {
            RotationScheduler::spawn(&engine, config.rotation.clone())?;
        }

        debug!("Stats: initialized");
        Ok(engine)
    }

    /// Record one DNS query in the live unit.
    ///
    /// Events without a result, with an empty domain or with a client address
    /// that is neither IPv4 nor IPv6 are dropped silently. No-op after close.
    pub fn ingest(&self, event: &Event) {
        let Some(result) = event.result else {
            return;
        };
        if event.domain.is_empty() {
            return;
        }
        let Some(client) = event.client_addr() else {
            return;
        };

        let mut guard = self.unit.lock();
        if let Some(unit) = guard.as_mut() {
            unit.record(result, &event.domain, client, event.time_us);
        }
    }

    /// Aggregate the retention window.
    ///
    /// # Arguments
    /// * `time_unit` - Granularity of the returned series
    ///
    /// # Returns
    /// Report over the hours `[now - limit + 1, now]`: stored units, the live
    /// unit in its own slot and zeros for hours without data.
    ///
    /// # Example
    /// ```rust,no_run
    /// # use dns_stats::{StatsEngine, TimeUnit};
    /// # fn demo(engine: &StatsEngine) -> Result<(), dns_stats::StatsError> {
    /// let report = engine.query(TimeUnit::Days)?;
    /// println!("{} queries", report.num_dns_queries);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// `StatsError::WindowMismatch` if the assembled window does not hold
    /// exactly one record per retained hour.
    pub fn query(&self, time_unit: TimeUnit) -> Result<StatsReport, StatsError> {
        let limit = self.limit_hours() as UnitId;
        let last_id = self.clock.unit_id();
        let first_id = last_id - limit + 1;

        let stored = load_stored(&self.store, first_id, last_id);

        let live = {
            let guard = self.unit.lock();
            guard.as_ref().map(|unit| (unit.id, unit.to_record()))
        };

        let window = UnitWindow::assemble(first_id, last_id, stored, live);
        if window.len() != limit as usize {
            error!("Stats: window has {} units, expected {}", window.len(), limit);
            return Err(StatsError::WindowMismatch {
                expected: limit as usize,
                actual: window.len(),
            });
        }

        Ok(build_report(&window, time_unit))
    }

    /// Set the retention interval.
    ///
    /// # Arguments
    /// * `days` - New interval in days. Negative values, and values whose
    ///   hour count does not fit in a `u32`, are ignored.
    ///
    /// Stored units are not rewritten; units outside the new window are
    /// evicted by later rotations.
    pub fn configure(&self, days: i32) {
        if days < 0 {
            return;
        }
        let Some(hours) = (days as u32).checked_mul(24) else {
            warn!("Stats: ignoring interval of {} days, too large", days);
            return;
        };
        self.limit.store(hours, Ordering::Relaxed);
        debug!("Stats: set limit: {}", days);
    }

    /// Retention interval in days.
    pub fn interval_days(&self) -> u32 {
        self.limit_hours() / 24
    }

    /// Retention window in hours; also the length of an hourly series.
    pub fn limit_hours(&self) -> u32 {
        self.limit.load(Ordering::Relaxed)
    }

    /// Id of the live unit, `None` once closed.
    pub fn current_unit_id(&self) -> Option<UnitId> {
        self.unit.lock().as_ref().map(|unit| unit.id)
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.unit.lock().is_none()
    }

    /// Receiver that flips to `true` when the engine closes.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Drop all statistics and restart counting from the current hour.
    ///
    /// If the database cannot be reopened the engine keeps counting in
    /// memory without persistence. No-op after close.
    pub fn clear(&self) {
        let _lifecycle = self.lifecycle.lock();
        if self.is_closed() {
            debug!("Stats: clear after close ignored");
            return;
        }

        if let Err(e) = self.store.reset() {
            warn!("Stats: unit store unavailable after clear: {}", e);
        }

        *self.unit.lock() = Some(Unit::new(self.clock.unit_id()));

        debug!("Stats: cleared");
    }

    /// Retire the live unit if the hour changed. Called by the rotation task.
    ///
    /// Persists the retired unit and evicts units outside the retention
    /// window in one transaction. Returns `true` if a rotation happened,
    /// even when persisting it failed.
    pub fn rotate_if_needed(&self) -> bool {
        let _lifecycle = self.lifecycle.lock();
        let id = self.clock.unit_id();

        let retired = {
            let mut guard = self.unit.lock();
            match guard.as_mut() {
                Some(unit) if unit.id != id => std::mem::replace(unit, Unit::new(id)),
                _ => return false,
            }
        };

        let record = retired.to_record();
        let Some(tx) = self.store.begin(true) else {
            warn!("Stats: unit {} was not flushed, store unavailable", retired.id);
            return true;
        };

        trace!("Stats: flushing unit {}", retired.id);
        let flushed = match tx.put(retired.id, &record) {
            Ok(()) => true,
            Err(e) => {
                error!("Stats: flush unit {}: {}", retired.id, e);
                false
            }
        };
        let evicted = purge_before(&tx, id - self.limit_hours() as UnitId + 1) != 0;

        if flushed || evicted {
            if let Err(e) = tx.commit() {
                error!("tx.Commit: {}", e);
            }
        } else {
            tx.rollback();
        }

        true
    }

    /// Retire the live unit, flush it and close the store.
    ///
    /// Stops the rotation task. Later calls to `ingest` are no-ops.
    pub fn close(&self) {
        let _lifecycle = self.lifecycle.lock();
        let retired = self.unit.lock().take();
        self.shutdown.send_replace(true);

        if let Some(unit) = retired {
            if let Some(tx) = self.store.begin(true) {
                match tx.put(unit.id, &unit.to_record()) {
                    Ok(()) => {
                        if let Err(e) = tx.commit() {
                            error!("tx.Commit: {}", e);
                        }
                    }
                    Err(e) => {
                        error!("Stats: flush unit {}: {}", unit.id, e);
                        tx.rollback();
                    }
                }
            }
        }

        self.store.close();
        debug!("Stats: closed");
    }
}

/// Delete every stored unit with an id below `cutoff`. Returns the number deleted.
fn purge_before(tx: &StoreTxn<'_>, cutoff: UnitId) -> usize {
    let mut stale = Vec::new();
    let visited = tx.for_each_unit(|id| {
        if id < cutoff {
            stale.push(id);
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    });
    if let Err(e) = visited {
        error!("Stats: list units: {}", e);
    }

    let mut deleted = 0;
    for id in stale {
        match tx.delete(id) {
            Ok(true) => {
                debug!("Stats: deleted unit {}", id);
                deleted += 1;
            }
            Ok(false) => {}
            Err(e) => error!("Stats: delete unit {}: {}", id, e),
        }
    }
    deleted
}
