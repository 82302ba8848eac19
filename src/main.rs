//! Ensemble trader decision core CLI.
//!
//! Evaluates trading cycles from snapshot files, records fills and closed
//! trades, and reweights strategies from their realized performance.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ensemble_trader::db::Database;
use ensemble_trader::metrics::PriceHistory;
use ensemble_trader::models::{AccountState, OpenPosition, StrategyId, TradeOutcome};
use ensemble_trader::strategy::default_strategies;
use ensemble_trader::trading::{Decision, DecisionEngine, EngineConfig, InstrumentSnapshot, WeightOptimizer};

/// Multi-strategy decision core CLI.
#[derive(Parser)]
#[command(name = "ensemble-trader")]
#[command(about = "Weighted strategy voting with correlation and risk budget guards", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "ENSEMBLE_DATABASE_URL", default_value = "sqlite:./ensemble_trader.db?mode=rwc")]
    database: String,

    /// JSON config file; built-in defaults when omitted
    #[arg(short, long, env = "ENSEMBLE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error or a full directive)
    #[arg(short, long, env = "ENSEMBLE_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config,

    /// Evaluate one cycle from a snapshot file
    Decide {
        /// Scenario JSON: account, open positions, instrument windows, price history
        #[arg(short, long)]
        scenario: PathBuf,

        /// Treat every execution as filled and charge the risk budget
        #[arg(long)]
        confirm: bool,
    },

    /// Record a closed trade for a strategy
    RecordOutcome {
        /// Strategy id (e.g. momentum_breakout)
        #[arg(short, long)]
        strategy: StrategyId,

        /// Realized P&L in account currency
        #[arg(short, long, allow_hyphen_values = true)]
        pnl: Decimal,
    },

    /// Re-derive strategy weights from recorded outcomes
    Optimize,

    /// Show risk budget usage for the current UTC day
    Budget,
}

/// Snapshot file consumed by `decide`.
#[derive(Debug, Deserialize)]
struct Scenario {
    account: AccountState,

    #[serde(default)]
    open_positions: Vec<OpenPosition>,

    instruments: Vec<InstrumentSnapshot>,

    /// Close prices keyed by instrument (or position series ref)
    #[serde(default)]
    history: PriceHistory,
}

/// Start of the current daily accounting period.
fn today_start(now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .context("Invalid midnight")?;
    Ok(midnight.and_utc())
}

/// Engine with weights and the risk budget restored from the database.
async fn restore_engine(config: EngineConfig, db: &Database, now: DateTime<Utc>) -> Result<DecisionEngine> {
    let period_start = today_start(now)?;
    let engine = DecisionEngine::new(config, default_strategies(), period_start)?;

    if let Some(weights) = db.load_weights().await? {
        if let Err(e) = engine.set_weights(weights).await {
            tracing::warn!(error = %e, "Stored weights invalid, using baseline");
        }
    }

    let events = db.consumption_events_since(period_start).await?;
    engine.restore_risk_state(period_start, &events).await;

    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("Invalid log filter {}", cli.log_level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig::load(cli.config.as_deref())?;
    let now = Utc::now();

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Decide { scenario, confirm } => {
            let raw = std::fs::read_to_string(&scenario)
                .with_context(|| format!("Failed to read scenario {}", scenario.display()))?;
            let scenario: Scenario = serde_json::from_str(&raw).context("Failed to parse scenario")?;

            let db = Database::new(&cli.database).await?;
            let engine = restore_engine(config, &db, now).await?;

            info!(
                instruments = scenario.instruments.len(),
                open_positions = scenario.open_positions.len(),
                "Evaluating cycle"
            );
            let reports = engine
                .evaluate_cycle(
                    &scenario.instruments,
                    &scenario.open_positions,
                    &scenario.account,
                    &scenario.history,
                )
                .await;

            println!("\n{:<10} {:<24} {:>6} {:>8} {:>10}", "INSTRUMENT", "DECISION", "DIR", "LOTS", "RISK%");
            println!("{}", "-".repeat(62));

            for report in &reports {
                let (direction, lots, risk) = match &report.decision {
                    Decision::Execute(order) => (
                        order.direction.to_string(),
                        order.lots().to_string(),
                        format!("{:.3}", order.size.risk_pct * Decimal::from(100)),
                    ),
                    Decision::RejectedCorrelation { direction, .. }
                    | Decision::RejectedRiskBudget { direction, .. } => {
                        (direction.to_string(), "-".to_string(), "-".to_string())
                    }
                    Decision::RejectedNoConsensus { .. } => {
                        ("-".to_string(), "-".to_string(), "-".to_string())
                    }
                };
                println!(
                    "{:<10} {:<24} {:>6} {:>8} {:>10}",
                    report.instrument,
                    report.decision.kind(),
                    direction,
                    lots,
                    risk
                );

                for failure in &report.strategy_failures {
                    println!("    ! {}: {}", failure.strategy_id, failure.error);
                }
            }

            println!("\n{}", serde_json::to_string_pretty(
                &reports.iter().map(|r| &r.decision).collect::<Vec<_>>(),
            )?);

            if confirm {
                for order in reports.iter().filter_map(|r| r.decision.order()) {
                    match engine.confirm_fill(order, now).await {
                        Ok(Some(event)) => {
                            db.record_consumption(&event).await?;
                            println!("Charged {} risk {} to the budget", order.instrument, event.risk_pct);
                        }
                        Ok(None) => {}
                        Err(e) => println!("Not charged {}: {}", order.instrument, e),
                    }
                }
            }
        }

        Commands::RecordOutcome { strategy, pnl } => {
            let db = Database::new(&cli.database).await?;
            let outcome = TradeOutcome::new(strategy, pnl, now);
            db.record_outcome(&outcome).await?;

            info!(strategy = %strategy, pnl = %pnl, "Outcome recorded");
            println!(
                "Recorded {} for {} ({})",
                pnl,
                strategy,
                if outcome.is_win() { "win" } else { "loss" }
            );
        }

        Commands::Optimize => {
            let db = Database::new(&cli.database).await?;
            let lookback = config.optimizer.lookback;
            let outcomes = db.outcomes_by_strategy(lookback).await?;
            let performance = WeightOptimizer::new(config.optimizer.clone()).performance(&outcomes, lookback);

            let engine = restore_engine(config, &db, now).await?;
            let previous = engine.current_weights().await;
            let weights = engine
                .reoptimize_if_due(now, &outcomes)
                .await
                .context("Optimizer did not run")?;
            db.save_weights(&weights).await?;

            println!(
                "\n{:<24} {:>7} {:>7} {:>10} {:>9} {:>9}",
                "STRATEGY", "TRADES", "WIN%", "P&L", "BEFORE", "AFTER"
            );
            println!("{}", "-".repeat(72));
            for perf in performance {
                let win_rate = perf
                    .win_rate
                    .map(|w| format!("{:.1}", w * 100.0))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:>7} {:>7} {:>10} {:>9.4} {:>9.4}",
                    perf.strategy_id.as_str(),
                    perf.trades,
                    win_rate,
                    perf.total_pnl.to_string(),
                    previous.get(perf.strategy_id),
                    weights.get(perf.strategy_id)
                );
            }
        }

        Commands::Budget => {
            let db = Database::new(&cli.database).await?;
            let period_start = today_start(now)?;
            let state = db.load_risk_state(period_start).await?;
            let max = config.risk.max_daily_risk;
            let hundred = Decimal::from(100);

            println!("\n=== Risk Budget ===\n");
            println!("  Period Start:   {}", state.period_start());
            println!("  Fills Charged:  {}", state.applied_count());
            println!("  Used:           {}%", state.risk_used_pct() * hundred);
            println!("  Remaining:      {}%", state.remaining(max) * hundred);
            println!("  Max Per Period: {}%", max * hundred);
            println!("  Max Per Trade:  {}%", config.risk.max_risk_per_trade() * hundred);
        }
    }

    Ok(())
}
