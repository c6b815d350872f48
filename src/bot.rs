//! Bot runner: the reconciliation loop with state persistence.
//!
//! Handles:
//! - Polling the target wallet's positions on a fixed interval
//! - Running one reconciliation pass per poll
//! - Persisting reconciliation state after every pass
//! - Periodic and shutdown summaries

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::ledger::LedgerStatistics;
use crate::trading::{Connector, Orchestrator, PassReport, PositionFeed};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Wallet whose positions are mirrored
    pub target: String,

    /// Polling interval (seconds)
    pub poll_interval_secs: u64,

    /// Log a summary every this many passes (0 disables)
    pub summary_every: u64,

    /// Stop after this many polls, if set
    pub max_polls: Option<u64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            poll_interval_secs: 30,
            summary_every: 20,
            max_polls: None,
        }
    }
}

/// Main bot runner.
pub struct Bot<F: PositionFeed, C: Connector> {
    config: BotConfig,
    feed: F,
    engine: Orchestrator<C>,
    db: Database,

    polls: u64,
    passes: u64,
    skipped_polls: u64,
    opened: u64,
    closed: u64,
    failed: u64,
    persist_failures: u64,
    started_at: DateTime<Utc>,
    last_pass_at: Option<DateTime<Utc>>,

    // Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl<F: PositionFeed, C: Connector> Bot<F, C> {
    /// Create a bot, resuming the engine from whatever state `db` holds for the target.
    pub async fn new(
        config: BotConfig,
        feed: F,
        engine: Orchestrator<C>,
        db: Database,
    ) -> Result<Self> {
        let state = db
            .load_state(&config.target)
            .await
            .context("Failed to load reconciliation state")?;

        info!(
            target = %config.target,
            synced = state.synced,
            tracked_markets = state.last_seen.len(),
            positions = state.positions.len(),
            "Reconciliation state loaded"
        );

        Ok(Self {
            engine: engine.with_state(state),
            config,
            feed,
            db,
            polls: 0,
            passes: 0,
            skipped_polls: 0,
            opened: 0,
            closed: 0,
            failed: 0,
            persist_failures: 0,
            started_at: Utc::now(),
            last_pass_at: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn engine(&self) -> &Orchestrator<C> {
        &self.engine
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            target = %self.config.target,
            poll_interval = self.config.poll_interval_secs,
            "Starting reconciliation loop"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        let mut outcome = Ok(());
        while !self.shutdown.load(Ordering::SeqCst) {
            poll_interval.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Reconciliation loop stopped");
                outcome = Err(e);
                break;
            }

            if self.config.max_polls.is_some_and(|max| self.polls >= max) {
                info!(polls = self.polls, "Poll limit reached");
                break;
            }
        }

        // Graceful shutdown
        self.shutdown().await;
        outcome
    }

    /// Fetch the target's positions and run one pass.
    ///
    /// Returns `None` when the feed was unavailable and the cycle was skipped.
    pub async fn poll_once(&mut self) -> Result<Option<PassReport>> {
        self.polls += 1;

        let snapshots = match self.feed.fetch_positions(&self.config.target).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                self.skipped_polls += 1;
                warn!(reason = e.reason(), error = %e, "Skipping cycle");
                return Ok(None);
            }
        };

        debug!(markets = snapshots.len(), "Fetched target positions");

        let report = self.engine.reconcile(&snapshots).await;
        self.passes += 1;
        self.opened += u64::from(report.opened);
        self.closed += u64::from(report.closed);
        self.failed += u64::from(report.failed);
        self.last_pass_at = Some(Utc::now());

        self.persist().await;

        if self.config.summary_every > 0 && self.passes % self.config.summary_every == 0 {
            info!("\n{}", self.stats());
        }

        Ok(Some(report))
    }

    /// Save the engine state. The in-memory state stays authoritative, and the
    /// next save rewrites everything, so a failure is logged and the loop goes on.
    async fn persist(&mut self) {
        if let Err(e) = self
            .db
            .save_state(&self.config.target, self.engine.state())
            .await
        {
            self.persist_failures += 1;
            error!(
                error = %e,
                failures = self.persist_failures,
                "Failed to persist reconciliation state"
            );
        }
    }

    /// Flush the ledger, persist state and print the final summary.
    async fn shutdown(&mut self) {
        info!("Shutting down...");

        if let Err(e) = self.engine.ledger().flush() {
            warn!(error = %e, "Failed to flush ledger on shutdown");
        }

        self.persist().await;

        info!("\n{}", self.stats());
        info!("Bot shutdown complete");
    }

    /// Get current stats.
    pub fn stats(&self) -> BotStats {
        BotStats {
            target: self.config.target.clone(),
            polls: self.polls,
            passes: self.passes,
            skipped_polls: self.skipped_polls,
            opened: self.opened,
            closed: self.closed,
            failed: self.failed,
            persist_failures: self.persist_failures,
            open_positions: self.engine.state().positions.len(),
            started_at: self.started_at,
            last_pass_at: self.last_pass_at,
            ledger: self.engine.statistics().clone(),
        }
    }
}

/// Bot statistics.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub target: String,
    pub polls: u64,
    pub passes: u64,
    pub skipped_polls: u64,
    pub opened: u64,
    pub closed: u64,
    pub failed: u64,
    pub persist_failures: u64,
    pub open_positions: usize,
    pub started_at: DateTime<Utc>,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub ledger: LedgerStatistics,
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Replication Summary ===")?;
        writeln!(f, "Target:          {}", self.target)?;
        writeln!(f, "Running Since:   {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(
            f,
            "Last Pass:       {}",
            self.last_pass_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never".to_string())
        )?;
        writeln!(
            f,
            "Polls:           {} ({} passes, {} skipped)",
            self.polls, self.passes, self.skipped_polls
        )?;
        writeln!(
            f,
            "Legs:            {} opened, {} closed, {} failed",
            self.opened, self.closed, self.failed
        )?;
        writeln!(f, "Open Positions:  {}", self.open_positions)?;
        if self.persist_failures > 0 {
            writeln!(f, "Failed Saves:    {}", self.persist_failures)?;
        }
        write!(f, "{}", self.ledger)
    }
}
