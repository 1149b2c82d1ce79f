//! Governor configuration
//!
//! Loaded from TOML, with every field optional. Environment variables with
//! the `GOVERNOR_` prefix override individual values after the file is read.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bandit::BanditAlgorithm;
use crate::drift::watchdog::MIN_LIVE_TRADES;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default)]
    pub bandit: BanditConfig,

    #[serde(default)]
    pub shadow: ShadowConfig,

    #[serde(default)]
    pub drift: DriftConfig,

    #[serde(default)]
    pub tca: TcaConfig,
}

impl GovernorConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading governor config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `GOVERNOR_CONFIG_PATH` (or `governor.toml`), then apply env overrides
    pub fn from_env() -> Self {
        let path = std::env::var("GOVERNOR_CONFIG_PATH")
            .unwrap_or_else(|_| "governor.toml".to_string());

        let mut config = Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default governor config ({}): {}", path, e);
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GOVERNOR_BANDIT_ENABLED") {
            self.bandit.enabled = v.parse().unwrap_or(self.bandit.enabled);
        }
        if let Ok(v) = std::env::var("GOVERNOR_BANDIT_ALGORITHM") {
            match v.to_ascii_lowercase().as_str() {
                "ucb1" => self.bandit.algorithm = BanditAlgorithm::Ucb1,
                "ucb_tuned" => self.bandit.algorithm = BanditAlgorithm::UcbTuned,
                "thompson" => self.bandit.algorithm = BanditAlgorithm::Thompson,
                other => tracing::warn!("Ignoring unknown GOVERNOR_BANDIT_ALGORITHM={}", other),
            }
        }
        if let Ok(v) = std::env::var("GOVERNOR_CANARY_MAX_TRADES_PER_DAY") {
            self.bandit.canary.max_trades_per_day =
                v.parse().unwrap_or(self.bandit.canary.max_trades_per_day);
        }
        if let Ok(v) = std::env::var("GOVERNOR_CANARY_MAX_SHARE_PER_DAY") {
            self.bandit.canary.max_share_pct_per_day =
                v.parse().unwrap_or(self.bandit.canary.max_share_pct_per_day);
        }
        if let Ok(v) = std::env::var("GOVERNOR_SHADOW_ENABLED") {
            self.shadow.enabled = v.parse().unwrap_or(self.shadow.enabled);
        }
        if let Ok(v) = std::env::var("GOVERNOR_DRIFT_ENABLED") {
            self.drift.enabled = v.parse().unwrap_or(self.drift.enabled);
        }
        if let Ok(v) = std::env::var("GOVERNOR_DRIFT_AUTO_DOWNGRADE") {
            self.drift.auto_downgrade = v.parse().unwrap_or(self.drift.auto_downgrade);
        }
        if let Ok(v) = std::env::var("GOVERNOR_TCA_ENABLED") {
            self.tca.enabled = v.parse().unwrap_or(self.tca.enabled);
        }
    }

    /// Reject values the components cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.bandit.decay.half_life_days > 0.0)
            || self.bandit.decay.half_life_days > MAX_HALF_LIFE_DAYS
        {
            bail!(
                "bandit.decay.half_life_days must be within (0, {}]",
                MAX_HALF_LIFE_DAYS
            );
        }
        if !(0.0..=1.0).contains(&self.bandit.canary.max_share_pct_per_day) {
            bail!("bandit.canary.max_share_pct_per_day must be within [0, 1]");
        }
        if !(self.bandit.reward.cap_r > 0.0) {
            bail!("bandit.reward.cap_r must be > 0");
        }
        if self.drift.window_trades < MIN_LIVE_TRADES {
            bail!("drift.window_trades must be >= {}", MIN_LIVE_TRADES);
        }
        if !(0.0..1.0).contains(&self.drift.threshold_pf_drop) {
            bail!("drift.threshold_pf_drop must be within [0, 1)");
        }
        if self.tca.history_size == 0 {
            bail!("tca.history_size must be >= 1");
        }
        if self.tca.retention_days <= 0 {
            bail!("tca.retention_days must be >= 1");
        }
        Ok(())
    }
}

// =============================================================================
// BANDIT
// =============================================================================

/// Bandit selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_algorithm")]
    pub algorithm: BanditAlgorithm,

    #[serde(default)]
    pub decay: DecayConfig,

    #[serde(default)]
    pub reward: RewardConfig,

    #[serde(default)]
    pub canary: CanaryConfig,

    /// Pull records older than this are pruned
    #[serde(default = "default_pull_retention_days")]
    pub pull_retention_days: i64,

    /// Fixed seed for stochastic algorithms (replays and tests)
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_algorithm() -> BanditAlgorithm {
    BanditAlgorithm::Thompson
}

fn default_pull_retention_days() -> i64 {
    90
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: default_algorithm(),
            decay: DecayConfig::default(),
            reward: RewardConfig::default(),
            canary: CanaryConfig::default(),
            pull_retention_days: default_pull_retention_days(),
            rng_seed: None,
        }
    }
}

const MAX_HALF_LIFE_DAYS: f64 = 36_500.0;

/// Exponential decay of arm statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
}

fn default_half_life_days() -> f64 {
    21.0
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life_days: default_half_life_days(),
        }
    }
}

impl DecayConfig {
    /// Half-life as a duration, clamped to [1s, MAX_HALF_LIFE_DAYS]
    pub fn half_life(&self) -> chrono::Duration {
        let max_secs = MAX_HALF_LIFE_DAYS * 24.0 * 3600.0;
        let secs = (self.half_life_days * 24.0 * 3600.0).clamp(1.0, max_secs);
        chrono::Duration::seconds(secs as i64)
    }
}

/// Reward shaping for realized outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Symmetric clip on pnl measured in R
    #[serde(default = "default_cap_r")]
    pub cap_r: f64,

    /// Reward penalty per bps of slippage
    #[serde(default = "default_slippage_penalty")]
    pub slippage_penalty_bps: f64,

    /// Reward penalty per bps of fees
    #[serde(default = "default_fees_penalty")]
    pub fees_penalty_bps: f64,
}

fn default_cap_r() -> f64 {
    3.0
}
fn default_slippage_penalty() -> f64 {
    0.30
}
fn default_fees_penalty() -> f64 {
    0.20
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            cap_r: default_cap_r(),
            slippage_penalty_bps: default_slippage_penalty(),
            fees_penalty_bps: default_fees_penalty(),
        }
    }
}

/// Daily exposure budget for candidate arms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryConfig {
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u64,

    /// Maximum fraction (0..=1) of a symbol's daily pulls that may go to candidates
    #[serde(default = "default_max_share")]
    pub max_share_pct_per_day: f64,
}

fn default_max_trades_per_day() -> u64 {
    20
}
fn default_max_share() -> f64 {
    0.25
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            max_trades_per_day: default_max_trades_per_day(),
            max_share_pct_per_day: default_max_share(),
        }
    }
}

// =============================================================================
// SHADOW
// =============================================================================

/// Shadow book and divergence alerting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// |shadow - live| / max(|live|, 1) in percent that triggers an alert
    #[serde(default = "default_divergence_pct")]
    pub divergence_pct_threshold: f64,

    /// Closed shadow trades required before alerts fire
    #[serde(default = "default_divergence_min_trades")]
    pub divergence_min_trades: usize,

    /// How long CLOSED shadow positions are kept in memory
    #[serde(default = "default_shadow_retention_days")]
    pub closed_retention_days: i64,
}

fn default_divergence_pct() -> f64 {
    15.0
}
fn default_divergence_min_trades() -> usize {
    10
}
fn default_shadow_retention_days() -> i64 {
    30
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            divergence_pct_threshold: default_divergence_pct(),
            divergence_min_trades: default_divergence_min_trades(),
            closed_retention_days: default_shadow_retention_days(),
        }
    }
}

// =============================================================================
// DRIFT
// =============================================================================

/// Drift watchdog thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rolling window length (trades) for live and shadow performance.
    /// At least 5: the live window needs that many trades before evaluating.
    #[serde(default = "default_window_trades")]
    pub window_trades: usize,

    /// Relative profit-factor / win-rate drop that counts as a breach
    #[serde(default = "default_pf_drop")]
    pub threshold_pf_drop: f64,

    /// Max drawdown over the window, percent of peak
    #[serde(default = "default_max_dd_pct")]
    pub threshold_max_dd_pct: f64,

    #[serde(default = "default_expected_pf")]
    pub expected_profit_factor: f64,

    #[serde(default = "default_expected_win_rate")]
    pub expected_win_rate: f64,

    /// When false, breaches are only logged
    #[serde(default = "default_true")]
    pub auto_downgrade: bool,

    /// Window entries older than this are pruned
    #[serde(default = "default_drift_retention_days")]
    pub retention_days: i64,
}

fn default_window_trades() -> usize {
    40
}
fn default_pf_drop() -> f64 {
    0.25
}
fn default_max_dd_pct() -> f64 {
    8.0
}
fn default_expected_pf() -> f64 {
    1.3
}
fn default_expected_win_rate() -> f64 {
    0.5
}
fn default_drift_retention_days() -> i64 {
    30
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_trades: default_window_trades(),
            threshold_pf_drop: default_pf_drop(),
            threshold_max_dd_pct: default_max_dd_pct(),
            expected_profit_factor: default_expected_pf(),
            expected_win_rate: default_expected_win_rate(),
            auto_downgrade: true,
            retention_days: default_drift_retention_days(),
        }
    }
}

// =============================================================================
// TCA
// =============================================================================

/// Transaction cost analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Max samples retained per symbol (oldest evicted first)
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Samples older than this are evicted
    #[serde(default = "default_tca_retention_days")]
    pub retention_days: i64,

    /// Submissions never filled within this window are dropped
    #[serde(default = "default_pending_ttl_minutes")]
    pub pending_ttl_minutes: i64,
}

fn default_history_size() -> usize {
    500
}
fn default_tca_retention_days() -> i64 {
    7
}
fn default_pending_ttl_minutes() -> i64 {
    60
}

impl Default for TcaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_size: default_history_size(),
            retention_days: default_tca_retention_days(),
            pending_ttl_minutes: default_pending_ttl_minutes(),
        }
    }
}
