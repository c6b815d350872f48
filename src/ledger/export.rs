//! CSV export of ledger entries for reporting.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use csv::Writer;

use super::entry::LedgerEntry;
use crate::models::{from_units, COLLATERAL_DECIMALS};

const HEADER: [&str; 14] = [
    "trade_id",
    "side",
    "market_id",
    "outcome",
    "amount_usdc",
    "token_amount",
    "fee_cost",
    "tx_ref",
    "recorded_at",
    "status",
    "closed_at",
    "realized_pnl_usdc",
    "linked_buy",
    "orphaned",
];

/// Write one row per entry, in ledger order.
pub fn write_csv<W: Write>(entries: &[LedgerEntry], out: W) -> Result<()> {
    let mut writer = Writer::from_writer(out);
    writer.write_record(HEADER)?;

    for entry in entries {
        let pnl = entry.realized_pnl.map(|p| {
            let magnitude = from_units(p.unsigned_abs(), COLLATERAL_DECIMALS);
            if p < 0 { -magnitude } else { magnitude }
        });

        writer.write_record(&[
            entry.trade_id.to_string(),
            entry.side.as_str().to_string(),
            entry.market_id.clone(),
            entry.outcome.to_string(),
            from_units(entry.amount, COLLATERAL_DECIMALS).to_string(),
            entry.token_amount.to_string(),
            entry.fee_cost.to_string(),
            entry.tx_ref.clone(),
            entry.recorded_at.to_rfc3339(),
            entry
                .status
                .map(|s| format!("{:?}", s).to_uppercase())
                .unwrap_or_default(),
            entry.closed_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            pnl.map(|p| p.to_string()).unwrap_or_default(),
            entry.linked_buy.map(|id| id.to_string()).unwrap_or_default(),
            entry.orphaned.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Export to a file at `path`.
pub fn export_csv(entries: &[LedgerEntry], path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    write_csv(entries, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BuyRecord, Ledger, SellRecord};
    use crate::models::Outcome;

    #[test]
    fn test_one_row_per_entry() {
        let mut ledger = Ledger::in_memory();
        ledger
            .record_buy(BuyRecord {
                market_id: "0xabc".to_string(),
                outcome: Outcome::SideA,
                amount: 10_000_000,
                token_amount: 19_800_000,
                fee_cost: 0,
                tx_ref: "sim-1".to_string(),
            })
            .unwrap();
        ledger
            .record_sell(SellRecord {
                market_id: "0xabc".to_string(),
                outcome: Outcome::SideA,
                amount: 9_801_000,
                token_amount: 19_800_000,
                fee_cost: 0,
                tx_ref: "sim-2".to_string(),
                linked_buy: None,
                settlement: None,
            })
            .unwrap();

        let mut out = Vec::new();
        write_csv(ledger.entries(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("trade_id,side,market_id"));
        assert!(lines[1].starts_with("1,BUY,0xabc,SIDE_A,10.000000,"));
        assert!(lines[1].contains(",CLOSED,"));
        assert!(lines[1].contains(",-0.199000,"));
        assert!(lines[2].starts_with("2,SELL,0xabc,SIDE_A,9.801000,"));
        assert!(lines[2].ends_with(",1,false"));
    }
}
