//! Logging setup and metric names
//!
//! Metrics go through the `metrics` facade. Without an installed recorder the
//! macros are no-ops, so publication can never hold up a trading decision.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Bandit
pub const BANDIT_PULLS: &str = "bandit_pull_total";
pub const BANDIT_REWARD: &str = "bandit_reward";
pub const BANDIT_BLOCKED: &str = "bandit_blocked_total";
pub const BANDIT_CANARY_SHARE: &str = "bandit_canary_share";

// Drift
pub const DRIFT_STAGE: &str = "drift_stage";
pub const DRIFT_SIZING_MULTIPLIER: &str = "drift_sizing_multiplier";
pub const DRIFT_DOWNGRADES: &str = "drift_downgrades_total";

// Shadow
pub const SHADOW_DIVERGENCE_ALERTS: &str = "shadow_divergence_alerts_total";
pub const SHADOW_PNL_LIVE: &str = "shadow_pnl_live";
pub const SHADOW_PNL_SHADOW: &str = "shadow_pnl_shadow";
pub const SHADOW_OPEN_POSITIONS: &str = "shadow_open_positions";

// TCA
pub const TCA_SAMPLES: &str = "tca_samples_total";
pub const TCA_SLIPPAGE_AVG_BPS: &str = "tca_slippage_avg_bps";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies.
pub fn init_tracing(default_filter: &str) {
    let default_filter = default_filter.to_string();
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
