//! Database persistence for reconciliation state.
//!
//! Stores everything needed to resume after restart without replaying trades:
//! - Sync flag and the target wallet the state belongs to
//! - What the target held at the end of the last pass
//! - Our replicated positions

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::models::{ConnectorRef, LocalPosition, Outcome, SeenPosition};
use crate::trading::ReconciliationState;

/// Database connection pool holding reconciliation state.
pub struct Database {
    pool: SqlitePool,
}

/// Sync metadata stored in database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncRow {
    pub synced: bool,
    pub target: String,
    pub last_pass_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SeenRow {
    market_id: String,
    outcome: String,
    balance: i64,
    resolved: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct PositionRow {
    market_id: String,
    outcome: String,
    invested_amount: i64,
    token_amount: i64,
    market_address: String,
    collateral_token: String,
    outcome_token: String,
    decimals: i64,
    trade_id: i64,
    opened_at: DateTime<Utc>,
}

impl PositionRow {
    fn into_position(self) -> Result<LocalPosition> {
        Ok(LocalPosition {
            outcome: Outcome::from_str(&self.outcome)
                .with_context(|| format!("Bad outcome for position {}", self.market_id))?,
            invested_amount: from_db(self.invested_amount),
            token_amount: from_db(self.token_amount),
            connector_ref: ConnectorRef {
                market_address: self.market_address,
                collateral_token: self.collateral_token,
                outcome_token: self.outcome_token,
                decimals: u32::try_from(self.decimals).context("Bad decimals")?,
            },
            trade_id: from_db(self.trade_id),
            opened_at: self.opened_at,
            market_id: self.market_id,
        })
    }
}

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
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

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                synced INTEGER NOT NULL DEFAULT 0,
                target TEXT NOT NULL DEFAULT '',
                last_pass_at TEXT,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS last_seen (
                market_id TEXT PRIMARY KEY,
                outcome TEXT NOT NULL,
                balance INTEGER NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS local_positions (
                market_id TEXT PRIMARY KEY,
                outcome TEXT NOT NULL,
                invested_amount INTEGER NOT NULL,
                token_amount INTEGER NOT NULL,
                market_address TEXT NOT NULL,
                collateral_token TEXT NOT NULL,
                outcome_token TEXT NOT NULL,
                decimals INTEGER NOT NULL,
                trade_id INTEGER NOT NULL,
                opened_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Sync State ====================

    /// Sync metadata, if a pass was ever saved.
    pub async fn get_sync_row(&self) -> Result<Option<SyncRow>> {
        sqlx::query_as::<_, SyncRow>(
            "SELECT synced, target, last_pass_at FROM sync_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read sync state")
    }

    /// Load the state saved for `target`.
    ///
    /// When the stored state belongs to another target, the target's last seen
    /// holdings are discarded and the next pass is a cold start. Our own
    /// positions are kept either way.
    pub async fn load_state(&self, target: &str) -> Result<ReconciliationState> {
        let positions = self.get_positions().await?;
        let mut state = ReconciliationState {
            positions,
            ..Default::default()
        };

        let Some(row) = self.get_sync_row().await? else {
            debug!("No saved reconciliation state");
            return Ok(state);
        };

        if !row.target.eq_ignore_ascii_case(target) {
            warn!(
                previous = %row.target,
                target = %target,
                "Target changed since last run, starting cold"
            );
            return Ok(state);
        }

        state.synced = row.synced;
        state.last_seen = self.get_last_seen().await?;
        Ok(state)
    }

    /// Replace the stored state in a single transaction.
    pub async fn save_state(&self, target: &str, state: &ReconciliationState) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO sync_state (id, synced, target, last_pass_at, updated_at)
            VALUES (1, ?, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                synced = excluded.synced,
                target = excluded.target,
                last_pass_at = excluded.last_pass_at,
                updated_at = datetime('now')
            "#,
        )
        .bind(state.synced)
        .bind(target)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM last_seen").execute(&mut *tx).await?;
        for (market_id, seen) in &state.last_seen {
            sqlx::query(
                "INSERT INTO last_seen (market_id, outcome, balance, resolved) VALUES (?, ?, ?, ?)",
            )
            .bind(market_id)
            .bind(seen.outcome.as_str())
            .bind(to_db(seen.balance))
            .bind(seen.resolved)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM local_positions").execute(&mut *tx).await?;
        for position in state.positions.values() {
            sqlx::query(
                r#"
                INSERT INTO local_positions (
                    market_id, outcome, invested_amount, token_amount, market_address,
                    collateral_token, outcome_token, decimals, trade_id, opened_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&position.market_id)
            .bind(position.outcome.as_str())
            .bind(to_db(position.invested_amount))
            .bind(to_db(position.token_amount))
            .bind(&position.connector_ref.market_address)
            .bind(&position.connector_ref.collateral_token)
            .bind(&position.connector_ref.outcome_token)
            .bind(i64::from(position.connector_ref.decimals))
            .bind(to_db(position.trade_id))
            .bind(position.opened_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("Failed to commit reconciliation state")?;
        Ok(())
    }

    // ==================== Holdings ====================

    async fn get_last_seen(&self) -> Result<HashMap<String, SeenPosition>> {
        let rows = sqlx::query_as::<_, SeenRow>(
            "SELECT market_id, outcome, balance, resolved FROM last_seen",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to read last seen holdings")?;

        rows.into_iter()
            .map(|row| {
                let outcome = Outcome::from_str(&row.outcome)
                    .with_context(|| format!("Bad outcome for market {}", row.market_id))?;
                Ok((
                    row.market_id,
                    SeenPosition {
                        outcome,
                        balance: from_db(row.balance),
                        resolved: row.resolved,
                    },
                ))
            })
            .collect()
    }

    /// Our replicated positions, keyed by market.
    pub async fn get_positions(&self) -> Result<HashMap<String, LocalPosition>> {
        let rows = sqlx::query_as::<_, PositionRow>("SELECT * FROM local_positions")
            .fetch_all(&self.pool)
            .await
            .context("Failed to read local positions")?;

        rows.into_iter()
            .map(|row| {
                let position = row.into_position()?;
                Ok((position.market_id.clone(), position))
            })
            .collect()
    }
}
