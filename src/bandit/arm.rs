//! Arms, pulls and selection context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::stats::ArmStats;
use crate::types::Side;

pub type ArmId = Uuid;
pub type PresetId = Uuid;

/// Regime label used when the caller has none
pub const UNKNOWN_REGIME: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArmStatus {
    Eligible,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArmRole {
    /// The promoted preset for the key
    Baseline,
    /// Exploratory preset under the canary budget
    Candidate,
}

impl ArmRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ArmRole::Baseline => "baseline",
            ArmRole::Candidate => "candidate",
        }
    }
}

/// (symbol, regime, side) - arms compete only within one key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArmKey {
    pub symbol: String,
    pub regime: String,
    pub side: Side,
}

impl ArmKey {
    pub fn new(symbol: impl Into<String>, regime: impl Into<String>, side: Side) -> Self {
        let regime = regime.into();
        Self {
            symbol: symbol.into(),
            regime: if regime.is_empty() {
                UNKNOWN_REGIME.to_string()
            } else {
                regime
            },
            side,
        }
    }
}

/// Preset offered to the bandit for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetDescriptor {
    pub preset_id: PresetId,
    pub role: ArmRole,
}

/// One selectable preset for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    pub id: ArmId,
    pub symbol: String,
    pub regime: String,
    pub side: Side,
    pub preset_id: PresetId,
    pub status: ArmStatus,
    pub role: ArmRole,
    pub stats: ArmStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BanditArm {
    pub fn new(key: &ArmKey, preset_id: PresetId, role: ArmRole, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: key.symbol.clone(),
            regime: key.regime.clone(),
            side: key.side,
            preset_id,
            status: ArmStatus::Eligible,
            role,
            stats: ArmStats::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ArmKey {
        ArmKey {
            symbol: self.symbol.clone(),
            regime: self.regime.clone(),
            side: self.side,
        }
    }

    #[inline]
    pub fn is_eligible(&self) -> bool {
        self.status == ArmStatus::Eligible
    }
}

/// Feature map attached to a selection.
///
/// Non-finite numeric features are dropped on insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BanditContext {
    features: BTreeMap<String, Value>,
}

impl BanditContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_number(mut self, key: impl Into<String>, value: f64) -> Self {
        if let Some(number) = serde_json::Number::from_f64(value) {
            self.features.insert(key.into(), Value::Number(number));
        }
        self
    }

    pub fn with_text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.features.insert(key.into(), Value::String(value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.features.get(key)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Realized outcome fed back into an arm's stats
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PullOutcome {
    pub reward: f64,
    pub pnl_r: f64,
    pub slippage_bps: f64,
    pub fees_bps: f64,
}

/// Record of one selection; the outcome fields are filled once on resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditPull {
    pub id: u64,
    pub arm_id: ArmId,
    pub timestamp: DateTime<Utc>,
    pub decision_id: String,
    pub context: BanditContext,
    pub reward: Option<f64>,
    pub pnl_r: Option<f64>,
    pub slippage_bps: Option<f64>,
    pub fees_bps: Option<f64>,
    pub symbol: String,
    pub regime: String,
    pub side: Side,
    pub role: ArmRole,
}

impl BanditPull {
    pub fn is_resolved(&self) -> bool {
        self.reward.is_some()
    }
}

/// Result of a successful selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditSelection {
    pub arm_id: ArmId,
    pub preset_id: PresetId,
    pub role: ArmRole,
    pub decision_id: String,
    pub context: BanditContext,
}
