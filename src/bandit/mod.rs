//! Preset Selection Bandit
//!
//! Online multi-armed bandit over trading presets, one arm per
//! (symbol, regime, side, preset).
//!
//! ## Components
//!
//! - `stats`: exponentially decayed reward aggregates per arm
//! - `algorithm`: UCB1 / UCB-Tuned / Thompson sampling
//! - `canary`: daily budget for candidate (exploratory) arms
//! - `selector`: algorithm + canary gating behind one `select` call
//! - `store`: arm and pull persistence boundary, with an in-memory store
//! - `reward`: pnl-in-R to reward shaping

pub mod algorithm;
pub mod arm;
pub mod canary;
pub mod reward;
pub mod selector;
pub mod stats;
pub mod store;


pub use algorithm::BanditAlgorithm;
pub use arm::*;
pub use canary::{CanaryBudgetManager, CanaryGate};
pub use reward::RewardModel;
pub use selector::{BanditArmSelector, BanditOverview};
pub use stats::ArmStats;
pub use store::{role_for, BanditStore, CanaryBudgetSnapshot, InMemoryBanditStore};
