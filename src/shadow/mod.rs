//! Shadow Trading
//!
//! A capital-free book mirroring live signals. Closed shadow trades feed the
//! drift watchdog and are compared with live pnl for divergence alerts.

pub mod book;
pub mod engine;

pub use book::{ShadowPosition, ShadowPositionBook, ShadowPositionStatus};
pub use engine::{ShadowEngine, ShadowStatus};
