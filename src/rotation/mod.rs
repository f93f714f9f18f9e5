//! Unit rotation - retire the live unit at every hour boundary.
//!
//! The scheduler polls the unit clock on a short interval. When the hour
//! changes it asks the engine to swap in a fresh unit, persist the retired
//! one and evict units that fell out of the retention window.

pub mod scheduler;

pub use scheduler::{RotationConfig, RotationScheduler};
