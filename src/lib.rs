//! # DNS Query Statistics
//!
//! Rolling per-hour statistics for a DNS resolver: query counts by result,
//! top domains and clients, and average processing time over a retention
//! window of 1 to 90 days.
//!
//! Events are folded into an in-memory unit for the current hour. At every
//! hour boundary the unit is reduced to a compact record (top 100 lists,
//! average time) and written to an embedded SQLite database; units older
//! than the retention window are deleted. Queries merge the stored records
//! with the live unit.
//!
//! ```rust,no_run
//! use dns_stats::{Event, ResultKind, StatsConfig, StatsEngine, TimeUnit};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = StatsEngine::open(StatsConfig::from_env())?;
//! engine.ingest(&Event::new(ResultKind::Filtered, "ads.example", "10.0.0.7".parse()?, 850));
//! let report = engine.query(TimeUnit::Hours)?;
//! println!("{}", serde_json::to_string(&report)?);
//! engine.close();
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod rotation;
pub mod storage;
pub mod types;

pub use aggregate::StatsReport;
pub use config::{is_valid_interval, StatsConfig};
pub use engine::StatsEngine;
pub use error::StatsError;
pub use rotation::{RotationConfig, RotationScheduler};
pub use storage::{CountPair, StoreError, UnitRecord, UnitStore};
pub use types::{Event, ResultKind, SystemClock, TimeUnit, UnitClock, UnitId};
