//! Performance Drift Detection
//!
//! Compares rolling live results against the shadow book and configured
//! expectations, and throttles exposure in stages when live performance
//! drifts away from them.

pub mod watchdog;
pub mod window;

pub use watchdog::{DriftStage, DriftStatus, DriftWatchdog};
pub use window::{PerformanceWindow, WindowMetrics};
