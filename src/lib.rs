//! Execution Governor Library
//!
//! Adaptive execution-risk controls for a trading allocator: bandit preset
//! selection under a canary budget, shadow trading with divergence alerts,
//! drift-based downgrades and slippage-aware order routing.

pub mod bandit;
pub mod clock;
pub mod config;
pub mod drift;
pub mod error;
pub mod governor;
pub mod keyed;
pub mod notify;
pub mod shadow;
pub mod tca;
pub mod telemetry;
pub mod trading_state;
pub mod types;

pub use config::GovernorConfig;
pub use error::{GovernorError, GovernorResult};
pub use governor::{ExecutionGovernor, PruneReport};
