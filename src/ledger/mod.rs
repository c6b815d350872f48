//! Append-only trade ledger with derived statistics.
//!
//! Every mutation rewrites the ledger file atomically (temp file + rename).
//! A failed write is logged and the in-memory ledger stays authoritative.

mod entry;
mod export;
mod stats;

pub use entry::{BuyRecord, LedgerEntry, SellRecord, TradeClosure, TradeSide, TradeStatus};
pub use export::{export_csv, write_csv};
pub use stats::{signed_diff, LedgerStatistics};

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// On-disk format version.
pub const LEDGER_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported ledger version {0}")]
    UnsupportedVersion(u32),

    #[error("market {market_id} already has open BUY #{trade_id}")]
    DuplicateOpenBuy { market_id: String, trade_id: u64 },

    #[error("unknown trade #{0}")]
    UnknownTrade(u64),

    #[error("trade #{0} is not a BUY")]
    NotABuy(u64),

    #[error("trade #{0} is already closed")]
    AlreadyClosed(u64),
}

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    entries: Vec<LedgerEntry>,
    stats: LedgerStatistics,
}

/// Serialized view used for writing without cloning the entries.
#[derive(Serialize)]
struct LedgerFileRef<'a> {
    version: u32,
    entries: &'a [LedgerEntry],
    stats: &'a LedgerStatistics,
}

/// The trade ledger.
#[derive(Debug)]
pub struct Ledger {
    path: Option<PathBuf>,
    entries: Vec<LedgerEntry>,
    stats: LedgerStatistics,
    next_id: u64,
}

impl Ledger {
    /// Ledger that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Vec::new(),
            stats: LedgerStatistics::default(),
            next_id: 1,
        }
    }

    /// Open the ledger file at `path`, starting empty if it does not exist.
    ///
    /// A corrupt file is an error rather than a fresh start: silently dropping
    /// trade history would break every statistic derived from it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        if !path.exists() {
            info!(path = %path.display(), "No ledger file found, starting empty");
            return Ok(Self {
                path: Some(path),
                ..Self::in_memory()
            });
        }

        let reader = BufReader::new(File::open(&path)?);
        let file: LedgerFile = serde_json::from_reader(reader)?;
        if file.version != LEDGER_VERSION {
            return Err(LedgerError::UnsupportedVersion(file.version));
        }

        let next_id = file.entries.iter().map(|e| e.trade_id).max().unwrap_or(0) + 1;
        let stats = LedgerStatistics::calculate(&file.entries);
        if stats != file.stats {
            debug!("Stored ledger statistics were stale, recomputed");
        }

        info!(
            path = %path.display(),
            entries = file.entries.len(),
            open = stats.open_positions,
            "Loaded ledger"
        );

        Ok(Self {
            path: Some(path),
            entries: file.entries,
            stats,
            next_id,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn get(&self, trade_id: u64) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.trade_id == trade_id)
    }

    pub fn statistics(&self) -> &LedgerStatistics {
        &self.stats
    }

    /// BUY entries that have not been closed yet.
    pub fn open_positions(&self) -> Vec<&LedgerEntry> {
        self.entries.iter().filter(|e| e.is_open()).collect()
    }

    fn open_buy_for_market(&self, market_id: &str) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.is_open() && e.market_id == market_id)
    }

    /// Append a BUY. Fails if the market already has an open BUY.
    pub fn record_buy(&mut self, record: BuyRecord) -> Result<u64, LedgerError> {
        if let Some(existing) = self.open_buy_for_market(&record.market_id) {
            return Err(LedgerError::DuplicateOpenBuy {
                market_id: record.market_id,
                trade_id: existing.trade_id,
            });
        }

        let trade_id = self.allocate_id();
        self.entries.push(LedgerEntry {
            trade_id,
            side: TradeSide::Buy,
            market_id: record.market_id,
            outcome: record.outcome,
            amount: record.amount,
            token_amount: record.token_amount,
            fee_cost: record.fee_cost,
            tx_ref: record.tx_ref,
            recorded_at: Utc::now(),
            status: Some(TradeStatus::Open),
            closed_at: None,
            realized_pnl: None,
            close_ref: None,
            linked_buy: None,
            orphaned: false,
            settlement: None,
        });

        self.after_mutation();
        Ok(trade_id)
    }

    /// Append a SELL and close the BUY it belongs to.
    ///
    /// Without an explicit link, the most recent open BUY for the same market
    /// and outcome is used; failing that the SELL is recorded as orphaned.
    pub fn record_sell(&mut self, record: SellRecord) -> Result<u64, LedgerError> {
        let linked = match record.linked_buy {
            Some(id) => {
                let buy = self.get(id).ok_or(LedgerError::UnknownTrade(id))?;
                if !buy.is_buy() {
                    return Err(LedgerError::NotABuy(id));
                }
                if !buy.is_open() {
                    return Err(LedgerError::AlreadyClosed(id));
                }
                Some((id, buy.amount))
            }
            None => self
                .entries
                .iter()
                .rev()
                .find(|e| {
                    e.is_open() && e.market_id == record.market_id && e.outcome == record.outcome
                })
                .map(|e| (e.trade_id, e.amount)),
        };

        if linked.is_none() {
            warn!(
                market = %record.market_id,
                outcome = %record.outcome,
                "No open BUY for SELL, recording as orphaned"
            );
        }

        let trade_id = self.allocate_id();
        let now = Utc::now();
        let returned = record.amount;
        self.entries.push(LedgerEntry {
            trade_id,
            side: TradeSide::Sell,
            market_id: record.market_id,
            outcome: record.outcome,
            amount: record.amount,
            token_amount: record.token_amount,
            fee_cost: record.fee_cost,
            tx_ref: record.tx_ref,
            recorded_at: now,
            status: None,
            closed_at: None,
            realized_pnl: None,
            close_ref: None,
            linked_buy: linked.map(|(id, _)| id),
            orphaned: linked.is_none(),
            settlement: record.settlement,
        });

        match linked {
            Some((buy_id, invested)) => self.close_trade(
                buy_id,
                TradeClosure {
                    closed_at: now,
                    realized_pnl: signed_diff(returned, invested),
                    close_ref: Some(trade_id),
                },
            )?,
            None => self.after_mutation(),
        }

        Ok(trade_id)
    }

    /// Close an open BUY. Closure fields are written exactly once.
    pub fn close_trade(&mut self, trade_id: u64, closure: TradeClosure) -> Result<(), LedgerError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.trade_id == trade_id)
            .ok_or(LedgerError::UnknownTrade(trade_id))?;

        if !entry.is_buy() {
            return Err(LedgerError::NotABuy(trade_id));
        }
        if !entry.is_open() {
            return Err(LedgerError::AlreadyClosed(trade_id));
        }

        entry.status = Some(TradeStatus::Closed);
        entry.closed_at = Some(closure.closed_at);
        entry.realized_pnl = Some(closure.realized_pnl);
        entry.close_ref = closure.close_ref;

        self.after_mutation();
        Ok(())
    }

    /// Write the ledger to disk, surfacing any failure.
    pub fn flush(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(
                &mut writer,
                &LedgerFileRef {
                    version: LEDGER_VERSION,
                    entries: &self.entries,
                    stats: &self.stats,
                },
            )?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;

        debug!(path = %path.display(), entries = self.entries.len(), "Saved ledger");
        Ok(())
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn after_mutation(&mut self) {
        self.stats = LedgerStatistics::calculate(&self.entries);
        if let Err(e) = self.flush() {
            warn!(error = %e, "Failed to persist ledger, keeping in-memory state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;

    fn buy_record(market: &str, outcome: Outcome, amount: u64) -> BuyRecord {
        BuyRecord {
            market_id: market.to_string(),
            outcome,
            amount,
            token_amount: amount * 2,
            fee_cost: 0,
            tx_ref: format!("0xbuy-{}", market),
        }
    }

    fn sell_record(market: &str, outcome: Outcome, amount: u64) -> SellRecord {
        SellRecord {
            market_id: market.to_string(),
            outcome,
            amount,
            token_amount: amount,
            fee_cost: 0,
            tx_ref: format!("0xsell-{}", market),
            linked_buy: None,
            settlement: None,
        }
    }

    #[test]
    fn test_buy_then_sell_closes_with_pnl() {
        let mut ledger = Ledger::in_memory();
        let buy_id = ledger.record_buy(buy_record("m1", Outcome::SideA, 10_000_000)).unwrap();
        let sell_id = ledger.record_sell(sell_record("m1", Outcome::SideA, 9_801_000)).unwrap();

        let buy = ledger.get(buy_id).unwrap();
        assert_eq!(buy.status, Some(TradeStatus::Closed));
        assert_eq!(buy.realized_pnl, Some(-199_000));
        assert_eq!(buy.close_ref, Some(sell_id));

        let sell = ledger.get(sell_id).unwrap();
        assert_eq!(sell.linked_buy, Some(buy_id));
        assert!(!sell.orphaned);

        let stats = ledger.statistics();
        assert_eq!(stats.total_pnl, -199_000);
        assert_eq!(stats.realized_pnl, stats.total_pnl);
        assert!(ledger.open_positions().is_empty());
    }

    #[test]
    fn test_single_open_buy_per_market() {
        let mut ledger = Ledger::in_memory();
        let first = ledger.record_buy(buy_record("m1", Outcome::SideA, 100)).unwrap();

        let err = ledger.record_buy(buy_record("m1", Outcome::SideB, 100)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::DuplicateOpenBuy { trade_id, .. } if trade_id == first
        ));

        // Once closed, the market can be opened again
        ledger.record_sell(sell_record("m1", Outcome::SideA, 100)).unwrap();
        assert!(ledger.record_buy(buy_record("m1", Outcome::SideB, 50)).is_ok());
        assert_eq!(ledger.open_positions().len(), 1);
    }

    #[test]
    fn test_sell_without_buy_is_orphaned() {
        let mut ledger = Ledger::in_memory();
        ledger.record_buy(buy_record("m1", Outcome::SideA, 100)).unwrap();

        // Wrong outcome does not match the open BUY
        let id = ledger.record_sell(sell_record("m1", Outcome::SideB, 40)).unwrap();
        let sell = ledger.get(id).unwrap();
        assert!(sell.orphaned);
        assert_eq!(sell.linked_buy, None);
        assert_eq!(ledger.statistics().orphaned_sells, 1);
        assert_eq!(ledger.open_positions().len(), 1);
    }

    #[test]
    fn test_close_trade_exactly_once() {
        let mut ledger = Ledger::in_memory();
        let buy_id = ledger.record_buy(buy_record("m1", Outcome::SideA, 100)).unwrap();
        let closure = TradeClosure {
            closed_at: Utc::now(),
            realized_pnl: -100,
            close_ref: None,
        };

        ledger.close_trade(buy_id, closure.clone()).unwrap();
        assert!(matches!(
            ledger.close_trade(buy_id, closure.clone()),
            Err(LedgerError::AlreadyClosed(_))
        ));
        assert!(matches!(
            ledger.close_trade(99, closure),
            Err(LedgerError::UnknownTrade(99))
        ));
    }

    #[test]
    fn test_explicit_link_must_be_open_buy() {
        let mut ledger = Ledger::in_memory();
        let buy_id = ledger.record_buy(buy_record("m1", Outcome::SideA, 100)).unwrap();
        let sell_id = ledger.record_sell(sell_record("m1", Outcome::SideA, 120)).unwrap();

        let mut again = sell_record("m1", Outcome::SideA, 1);
        again.linked_buy = Some(buy_id);
        assert!(matches!(
            ledger.record_sell(again),
            Err(LedgerError::AlreadyClosed(_))
        ));

        let mut bad = sell_record("m1", Outcome::SideA, 1);
        bad.linked_buy = Some(sell_id);
        assert!(matches!(ledger.record_sell(bad), Err(LedgerError::NotABuy(_))));
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        {
            let mut ledger = Ledger::open(&path).unwrap();
            ledger.record_buy(buy_record("m1", Outcome::SideA, 100)).unwrap();
            ledger.record_buy(buy_record("m2", Outcome::SideB, 200)).unwrap();
            ledger.record_sell(sell_record("m1", Outcome::SideA, 150)).unwrap();
        }

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.entries().len(), 3);
        assert_eq!(ledger.statistics().realized_pnl, 50);
        assert_eq!(ledger.open_positions().len(), 1);
        assert!(!path.with_extension("json.tmp").exists());

        // Ids keep counting after reload
        let mut ledger = ledger;
        assert_eq!(ledger.record_buy(buy_record("m3", Outcome::SideA, 1)).unwrap(), 4);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Ledger::open(&path), Err(LedgerError::Json(_))));
    }

    #[test]
    fn test_write_failure_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes every rename fail
        let path = dir.path().join("ledger.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        let mut ledger = Ledger {
            path: Some(path),
            ..Ledger::in_memory()
        };
        let id = ledger.record_buy(buy_record("m1", Outcome::SideA, 100)).unwrap();
        assert_eq!(ledger.get(id).map(|e| e.amount), Some(100));
        assert!(ledger.flush().is_err());
    }
}
