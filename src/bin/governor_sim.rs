//! Governor Simulation
//!
//! Drives the execution governor through a synthetic trading session on a
//! manual clock and prints the resulting state as JSON.
//!
//! Usage:
//!   governor_sim --config governor.toml --seed 7 --steps 400 --symbols BTCUSDT,ETHUSDT
//!
//! Environment Variables:
//!   GOVERNOR_CONFIG_PATH - Path to TOML config file
//!   RUST_LOG - Log filter (overrides --log-level)

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, TimeZone, Utc};
use clap::Parser;
use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use statrs::distribution::Normal;
use tracing::{info, warn};
use uuid::Uuid;

use execution_governor::bandit::{
    role_for, BanditContext, BanditOverview, InMemoryBanditStore, PresetDescriptor, PresetId,
};
use execution_governor::clock::{Clock, ManualClock};
use execution_governor::drift::DriftStatus;
use execution_governor::notify::RecordingNotifier;
use execution_governor::shadow::ShadowStatus;
use execution_governor::tca::{OrderSubmission, TcaAggregate};
use execution_governor::telemetry::init_tracing;
use execution_governor::types::{OrderType, Side};
use execution_governor::{ExecutionGovernor, GovernorConfig, GovernorError, PruneReport};

#[derive(Parser, Debug)]
#[command(name = "governor_sim")]
#[command(about = "Replay a synthetic session through the execution governor")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "GOVERNOR_CONFIG_PATH")]
    config: Option<String>,

    /// Seed for market noise and for the bandit when the config has none
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Comma separated symbols
    #[arg(long, value_delimiter = ',', default_value = "BTCUSDT,ETHUSDT")]
    symbols: Vec<String>,

    /// Decision steps per symbol
    #[arg(long, default_value = "300")]
    steps: usize,

    /// Step after which the live edge turns negative (0 = never)
    #[arg(long, default_value = "0")]
    degrade_after: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Preset with its hidden expected return in R
#[derive(Debug, Clone, Copy)]
struct SimPreset {
    descriptor: PresetDescriptor,
    edge_r: f64,
}

#[derive(Debug, Serialize)]
struct SymbolReport {
    bandit: BanditOverview,
    shadow: ShadowStatus,
    tca: TcaAggregate,
    preset_pulls: HashMap<String, u64>,
}

#[derive(Debug, Serialize)]
struct SimReport {
    seed: u64,
    steps: usize,
    decisions: usize,
    skipped: usize,
    drift: DriftStatus,
    events: usize,
    pruned: PruneReport,
    symbols: HashMap<String, SymbolReport>,
}

fn presets_for(symbol_idx: usize) -> Vec<SimPreset> {
    let base = (symbol_idx as u128 + 1) << 64;
    vec![
        SimPreset {
            descriptor: PresetDescriptor {
                preset_id: Uuid::from_u128(base + 1),
                role: role_for(true),
            },
            edge_r: 0.15,
        },
        SimPreset {
            descriptor: PresetDescriptor {
                preset_id: Uuid::from_u128(base + 2),
                role: role_for(false),
            },
            edge_r: 0.35,
        },
        SimPreset {
            descriptor: PresetDescriptor {
                preset_id: Uuid::from_u128(base + 3),
                role: role_for(false),
            },
            edge_r: -0.2,
        },
    ]
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let mut config = match &args.config {
        Some(path) => GovernorConfig::load(path)?,
        None => GovernorConfig::default(),
    };
    if config.bandit.rng_seed.is_none() {
        config.bandit.rng_seed = Some(args.seed);
    }

    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .context("invalid simulation start")?;
    let clock = Arc::new(ManualClock::new(start));
    let notifier = Arc::new(RecordingNotifier::new());
    let governor = ExecutionGovernor::new(
        config,
        Arc::new(InMemoryBanditStore::new()),
        notifier.clone(),
        clock.clone(),
    );

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let noise = Normal::new(0.0, 1.0).context("noise distribution")?;
    let presets: Vec<Vec<SimPreset>> = (0..args.symbols.len()).map(presets_for).collect();
    let mut prices: Vec<f64> = vec![100.0; args.symbols.len()];
    let mut preset_pulls: HashMap<PresetId, u64> = HashMap::new();
    let mut pruned = PruneReport::default();
    let mut decisions = 0usize;
    let mut skipped = 0usize;

    info!(
        "Simulating {} steps over {:?} (seed {})",
        args.steps, args.symbols, args.seed
    );

    for step in 0..args.steps {
        clock.advance(Duration::minutes(15));
        let degraded = args.degrade_after > 0 && step >= args.degrade_after;

        for (idx, symbol) in args.symbols.iter().enumerate() {
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let regime = if step % 96 < 48 { "TREND" } else { "RANGE" };
            let descriptors: Vec<PresetDescriptor> =
                presets[idx].iter().map(|p| p.descriptor).collect();
            governor.ensure_arms(symbol, regime, side, &descriptors);

            if !governor.allow_trading() {
                skipped += 1;
                continue;
            }

            let context = BanditContext::new()
                .with_text("regime", regime)
                .with_number("step", step as f64);
            let selection = match governor.select_arm(symbol, regime, side, context) {
                Ok(selection) => selection,
                Err(GovernorError::NoEligibleArm { .. }) => {
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            decisions += 1;
            *preset_pulls.entry(selection.preset_id).or_default() += 1;

            let edge = presets[idx]
                .iter()
                .find(|p| p.descriptor.preset_id == selection.preset_id)
                .map(|p| p.edge_r)
                .unwrap_or(0.0);
            let edge = if degraded { edge - 0.8 } else { edge };

            // Routing and execution cost
            let now = clock.now();
            let reference = prices[idx];
            let order_type = governor.recommend_order_type(symbol, OrderType::Market, now);
            let order_id = format!("{}-{}", symbol, step);
            governor.record_submission(OrderSubmission {
                order_id: Some(order_id.clone()),
                symbol: symbol.clone(),
                side,
                order_type,
                reference_price: Some(reference),
                volume_24h: Some(1.0e9),
                atr: Some(reference * 0.01),
                timestamp: Some(now),
            });
            let base_bps = match order_type {
                OrderType::Market => 9.0,
                OrderType::Limit => 2.0,
            };
            let slippage_bps = (base_bps + 3.0 * noise.sample(&mut rng)).max(-5.0);
            let fill_price = reference * (1.0 + side.sign() * slippage_bps / 10_000.0);
            governor.record_fill(&order_id, fill_price, Some(reference * 0.0002), Some(now));

            // Live result
            let pnl_r = edge + noise.sample(&mut rng);
            governor.record_trade_outcome(
                &selection.decision_id,
                Some(pnl_r),
                Some(slippage_bps),
                Some(1.0),
            )?;
            let sizing = governor.sizing_multiplier();
            if sizing > 0.0 {
                governor.report_live_fill(symbol, pnl_r * sizing * 10.0);
            }

            // Shadow mirror, closed by the next price tick
            let stop = reference * (1.0 - side.sign() * 0.01);
            let target = reference * (1.0 + side.sign() * 0.01);
            governor.register_shadow(symbol, side, reference, 10.0, stop, target);
            let drift = if degraded { -0.004 } else { 0.001 };
            let moved = reference * (1.0 + side.sign() * drift + 0.012 * noise.sample(&mut rng));
            prices[idx] = moved.max(1.0);
            governor.on_shadow_price_update(symbol, prices[idx]);
        }

        if step % 96 == 95 {
            let report = governor.prune_expired(clock.now());
            pruned.tca += report.tca;
            pruned.drift += report.drift;
            pruned.shadow += report.shadow;
            pruned.pulls += report.pulls;
        }
    }

    let drift = governor.watchdog_status();
    if drift.kill_switch {
        warn!("Simulation ended with the kill switch active");
    }

    let symbols = args
        .symbols
        .iter()
        .enumerate()
        .map(|(idx, symbol)| {
            let pulls = presets[idx]
                .iter()
                .map(|p| {
                    let id = p.descriptor.preset_id;
                    let label = format!("{}:{:+.2}R", p.descriptor.role.as_str(), p.edge_r);
                    (label, preset_pulls.get(&id).copied().unwrap_or(0))
                })
                .collect();
            let report = SymbolReport {
                bandit: governor.bandit_overview(symbol),
                shadow: governor.shadow_status(symbol),
                tca: governor.tca_aggregate(Some(symbol), None, None),
                preset_pulls: pulls,
            };
            (symbol.clone(), report)
        })
        .collect();

    let report = SimReport {
        seed: args.seed,
        steps: args.steps,
        decisions,
        skipped,
        drift,
        events: notifier.events().len(),
        pruned,
        symbols,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
