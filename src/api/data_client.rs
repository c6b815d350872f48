//! Polymarket Data API client: the live position feed for the target wallet.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{to_units, Outcome, PositionSnapshot, COLLATERAL_DECIMALS};
use crate::trading::{PositionFeed, ReplicationError};

use super::types::*;

const DATA_API_BASE: &str = "https://data-api.polymarket.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 500;
/// Hard stop for pagination so a misbehaving API cannot loop forever.
const MAX_PAGES: u32 = 20;

/// Client for Polymarket Data API (read-only operations).
pub struct DataClient {
    client: Client,
    base_url: String,
}

impl DataClient {
    /// Create a new data client with default settings.
    pub fn new() -> Result<Self> {
        Self::with_base_url(DATA_API_BASE.to_string())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Fetch every outcome row held by `address`, following pagination.
    pub async fn get_position_rows(&self, address: &str) -> Result<Vec<PositionResponse>> {
        let url = format!("{}/positions", self.base_url);
        let mut rows = Vec::new();

        for page in 0..MAX_PAGES {
            let params = PositionsParams {
                user: address.to_string(),
                size_threshold: Some(0.0),
                limit: Some(PAGE_SIZE),
                offset: Some(page * PAGE_SIZE),
            };

            debug!(url = %url, offset = page * PAGE_SIZE, "Fetching positions");

            let response = self
                .client
                .get(&url)
                .query(&params)
                .send()
                .await
                .context("Failed to fetch positions")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("Positions request failed: {} - {}", status, body);
            }

            let items: Vec<PositionResponse> = response
                .json()
                .await
                .context("Failed to parse positions response")?;

            let done = items.len() < PAGE_SIZE as usize;
            rows.extend(items);
            if done {
                break;
            }
        }

        Ok(rows)
    }
}

#[async_trait]
impl PositionFeed for DataClient {
    async fn fetch_positions(
        &self,
        address: &str,
    ) -> Result<Vec<PositionSnapshot>, ReplicationError> {
        let rows = self
            .get_position_rows(address)
            .await
            .map_err(|e| ReplicationError::FeedUnavailable(format!("{:#}", e)))?;
        Ok(group_positions(rows))
    }
}

#[derive(Default)]
struct MarketRows {
    balances: [u64; 2],
    cost: [Decimal; 2],
    resolved: bool,
    winner: Option<Outcome>,
}

/// Fold per-outcome rows into one snapshot per market, in first-seen order.
///
/// A redeemable row marks the market resolved. Its current price settles at
/// 1 for the winning token and 0 for the losing one, which is how the winner
/// is read back.
pub fn group_positions(rows: Vec<PositionResponse>) -> Vec<PositionSnapshot> {
    let mut order: Vec<String> = Vec::new();
    let mut markets: HashMap<String, MarketRows> = HashMap::new();

    for row in rows {
        let Some(outcome) = Outcome::from_index(row.outcome_index) else {
            warn!(
                market = %row.condition_id,
                outcome_index = row.outcome_index,
                "Skipping position row with non-binary outcome index"
            );
            continue;
        };

        let entry = markets.entry(row.condition_id.clone()).or_insert_with(|| {
            order.push(row.condition_id.clone());
            MarketRows::default()
        });

        let i = outcome.index();
        entry.balances[i] = entry.balances[i]
            .saturating_add(to_units(row.size, COLLATERAL_DECIMALS));
        entry.cost[i] += row.cost_basis();

        if row.redeemable {
            entry.resolved = true;
            if row.cur_price >= Decimal::ONE {
                entry.winner = Some(outcome);
            } else if row.cur_price.is_zero() && entry.winner.is_none() {
                entry.winner = Some(outcome.opposite());
            }
        }
    }

    order
        .into_iter()
        .filter_map(|market_id| {
            let rows = markets.remove(&market_id)?;
            Some(PositionSnapshot {
                market_id,
                balances: rows.balances,
                investments: rows.cost,
                resolved: rows.resolved,
                winning_outcome: if rows.resolved { rows.winner } else { None },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(market: &str, index: i64, size: Decimal, cost: Decimal) -> PositionResponse {
        PositionResponse {
            proxy_wallet: "0xtarget".to_string(),
            asset: String::new(),
            condition_id: market.to_string(),
            title: String::new(),
            outcome: String::new(),
            outcome_index: index,
            size,
            avg_price: Decimal::ZERO,
            cur_price: dec!(0.5),
            initial_value: cost,
            current_value: Decimal::ZERO,
            redeemable: false,
            negative_risk: false,
        }
    }

    #[test]
    fn test_groups_rows_by_market_in_order() {
        let snapshots = group_positions(vec![
            row("m2", 1, dec!(200), dec!(100)),
            row("m1", 0, dec!(10), dec!(4)),
            row("m2", 0, dec!(5), dec!(1)),
        ]);

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].market_id, "m2");
        assert_eq!(snapshots[0].balances, [5_000_000, 200_000_000]);
        assert_eq!(snapshots[0].investments, [dec!(1), dec!(100)]);
        assert_eq!(snapshots[0].held_outcome(None), Some(Outcome::SideB));

        assert_eq!(snapshots[1].market_id, "m1");
        assert_eq!(snapshots[1].balance_of(Outcome::SideA), 10_000_000);
        assert!(!snapshots[1].resolved);
    }

    #[test]
    fn test_skips_non_binary_rows() {
        let snapshots = group_positions(vec![
            row("m1", 2, dec!(10), dec!(4)),
            row("m2", 0, dec!(1), dec!(1)),
        ]);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].market_id, "m2");
    }

    #[test]
    fn test_redeemable_rows_carry_winner() {
        let mut won = row("m1", 1, dec!(20), dec!(10));
        won.redeemable = true;
        won.cur_price = dec!(1);

        let mut lost = row("m2", 0, dec!(20), dec!(10));
        lost.redeemable = true;
        lost.cur_price = Decimal::ZERO;

        let snapshots = group_positions(vec![won, lost]);
        assert!(snapshots[0].resolved);
        assert_eq!(snapshots[0].winning_outcome, Some(Outcome::SideB));
        assert!(snapshots[1].resolved);
        assert_eq!(snapshots[1].winning_outcome, Some(Outcome::SideB));
    }

    #[test]
    fn test_tied_market_keeps_both_cost_bases() {
        let snapshots = group_positions(vec![
            row("m1", 0, dec!(10), dec!(3)),
            row("m1", 1, dec!(10), dec!(6)),
        ]);

        assert!(snapshots[0].is_tied());
        assert_eq!(snapshots[0].investment_of(Outcome::SideA), dec!(3));
        assert_eq!(snapshots[0].investment_of(Outcome::SideB), dec!(6));
    }

    #[test]
    fn test_empty_feed() {
        assert!(group_positions(Vec::new()).is_empty());
    }
}
