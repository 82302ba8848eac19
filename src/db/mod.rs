//! SQLite snapshot store for state the engine replays at restart.
//!
//! Stores:
//! - Risk consumption events (the risk budget is rebuilt from these)
//! - Closed trade outcomes per strategy
//! - The latest strategy weights

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::models::{ConsumptionEvent, StrategyId, StrategyWeights, TradeOutcome};
use crate::trading::RiskBudgetState;

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored consumption event.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredRiskEvent {
    pub id: String,
    pub instrument: String,
    pub risk_pct: String,
    pub recorded_at: String,
}

/// Stored trade outcome.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredOutcome {
    pub id: i64,
    pub strategy_id: String,
    pub realized_pnl: String,
    pub closed_at: String,
}

/// Fixed-width UTC timestamps so text comparison matches time order.
fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp {raw}"))?
        .with_timezone(&Utc))
}

impl StoredRiskEvent {
    fn into_event(self) -> Result<ConsumptionEvent> {
        Ok(ConsumptionEvent {
            id: Uuid::parse_str(&self.id).with_context(|| format!("Invalid event id {}", self.id))?,
            risk_pct: self
                .risk_pct
                .parse::<Decimal>()
                .with_context(|| format!("Invalid risk_pct {}", self.risk_pct))?,
            recorded_at: parse_timestamp(&self.recorded_at)?,
            instrument: self.instrument,
        })
    }
}

impl StoredOutcome {
    fn into_outcome(self) -> Result<TradeOutcome> {
        Ok(TradeOutcome {
            strategy_id: self
                .strategy_id
                .parse::<StrategyId>()
                .context("Invalid strategy id")?,
            realized_pnl: self
                .realized_pnl
                .parse::<Decimal>()
                .with_context(|| format!("Invalid realized_pnl {}", self.realized_pnl))?,
            closed_at: parse_timestamp(&self.closed_at)?,
        })
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_events (
                id TEXT PRIMARY KEY,
                instrument TEXT NOT NULL,
                risk_pct TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy_id TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                closed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategy_weights (
                strategy_id TEXT PRIMARY KEY,
                weight REAL NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_risk_events_time ON risk_events(recorded_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outcomes_strategy ON trade_outcomes(strategy_id, closed_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Risk budget ====================

    /// Persist a consumption event. Returns false if it was already stored.
    pub async fn record_consumption(&self, event: &ConsumptionEvent) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO risk_events (id, instrument, risk_pct, recorded_at) VALUES (?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.instrument.as_str())
        .bind(event.risk_pct.to_string())
        .bind(timestamp(event.recorded_at))
        .execute(&self.pool)
        .await
        .context("Failed to record consumption event")?;

        Ok(result.rows_affected() == 1)
    }

    /// Consumption events recorded at or after `period_start`, oldest first.
    pub async fn consumption_events_since(
        &self,
        period_start: DateTime<Utc>,
    ) -> Result<Vec<ConsumptionEvent>> {
        let rows = sqlx::query_as::<_, StoredRiskEvent>(
            "SELECT * FROM risk_events WHERE recorded_at >= ? ORDER BY recorded_at",
        )
        .bind(timestamp(period_start))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch consumption events")?;

        rows.into_iter().map(StoredRiskEvent::into_event).collect()
    }

    /// Rebuild the risk budget for the period starting at `period_start`.
    pub async fn load_risk_state(&self, period_start: DateTime<Utc>) -> Result<RiskBudgetState> {
        let events = self.consumption_events_since(period_start).await?;
        debug!(events = events.len(), "Loaded consumption events");
        Ok(RiskBudgetState::replay(period_start, &events))
    }

    // ==================== Outcomes ====================

    /// Store a closed trade outcome.
    pub async fn record_outcome(&self, outcome: &TradeOutcome) -> Result<()> {
        sqlx::query("INSERT INTO trade_outcomes (strategy_id, realized_pnl, closed_at) VALUES (?, ?, ?)")
            .bind(outcome.strategy_id.as_str())
            .bind(outcome.realized_pnl.to_string())
            .bind(timestamp(outcome.closed_at))
            .execute(&self.pool)
            .await
            .context("Failed to record outcome")?;

        Ok(())
    }

    /// The most recent `lookback` outcomes of every strategy, newest first.
    pub async fn outcomes_by_strategy(
        &self,
        lookback: usize,
    ) -> Result<HashMap<StrategyId, Vec<TradeOutcome>>> {
        let mut by_strategy = HashMap::new();

        for id in StrategyId::ALL {
            let rows = sqlx::query_as::<_, StoredOutcome>(
                "SELECT * FROM trade_outcomes WHERE strategy_id = ? ORDER BY closed_at DESC, id DESC LIMIT ?",
            )
            .bind(id.as_str())
            .bind(lookback as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch outcomes")?;

            if rows.is_empty() {
                continue;
            }

            let outcomes = rows
                .into_iter()
                .map(StoredOutcome::into_outcome)
                .collect::<Result<Vec<_>>>()?;
            by_strategy.insert(id, outcomes);
        }

        Ok(by_strategy)
    }

    // ==================== Weights ====================

    /// Replace the stored weights.
    pub async fn save_weights(&self, weights: &StrategyWeights) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM strategy_weights")
            .execute(&mut *tx)
            .await?;

        let now = timestamp(Utc::now());
        for (id, weight) in weights.iter() {
            sqlx::query("INSERT INTO strategy_weights (strategy_id, weight, updated_at) VALUES (?, ?, ?)")
                .bind(id.as_str())
                .bind(weight)
                .bind(now.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.context("Failed to save weights")?;
        Ok(())
    }

    /// The stored weights, or `None` if none were saved.
    pub async fn load_weights(&self) -> Result<Option<StrategyWeights>> {
        let rows: Vec<(String, f64)> =
            sqlx::query_as("SELECT strategy_id, weight FROM strategy_weights")
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch weights")?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut weights = StrategyWeights::new();
        for (id, weight) in rows {
            let id = id.parse::<StrategyId>().context("Invalid strategy id")?;
            weights.set(id, weight);
        }
        Ok(Some(weights))
    }
}
