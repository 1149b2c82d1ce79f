//! Transaction Cost Analysis
//!
//! Slippage samples from real fills, hour-of-day cost estimates and
//! MARKET/LIMIT routing.

pub mod service;
pub mod store;

pub use service::{
    OrderSubmission, TcaAggregate, TcaService, LIMIT_TO_MARKET_BPS, MARKET_TO_LIMIT_BPS,
};
pub use store::{TcaSample, TcaSampleStore};
