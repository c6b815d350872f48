//! API response types for the Polymarket Data API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One outcome row from the /positions endpoint.
///
/// The Data API reports a wallet's holdings per outcome token, so a market
/// where both sides are held shows up as two rows sharing a condition id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    #[serde(default)]
    pub proxy_wallet: String,
    #[serde(default)]
    pub asset: String,
    pub condition_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub outcome: String,
    pub outcome_index: i64,
    pub size: Decimal,
    #[serde(default)]
    pub avg_price: Decimal,
    #[serde(default)]
    pub cur_price: Decimal,
    #[serde(default)]
    pub initial_value: Decimal,
    #[serde(default)]
    pub current_value: Decimal,
    #[serde(default)]
    pub redeemable: bool,
    #[serde(default)]
    pub negative_risk: bool,
}

impl PositionResponse {
    /// Cost basis of the row, falling back to `size * avgPrice` when the API
    /// leaves `initialValue` empty.
    pub fn cost_basis(&self) -> Decimal {
        if self.initial_value > Decimal::ZERO {
            self.initial_value
        } else {
            self.size * self.avg_price
        }
    }
}

/// Query parameters for /positions.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsParams {
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_position_row() {
        let body = r#"{
            "proxyWallet": "0xtarget",
            "asset": "1234",
            "conditionId": "0xabc",
            "size": 200.5,
            "avgPrice": 0.5,
            "initialValue": 100.25,
            "curPrice": 0.61,
            "redeemable": false,
            "outcome": "Yes",
            "outcomeIndex": 0
        }"#;

        let row: PositionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(row.condition_id, "0xabc");
        assert_eq!(row.size, dec!(200.5));
        assert_eq!(row.outcome_index, 0);
        assert_eq!(row.cost_basis(), dec!(100.25));
        assert!(!row.negative_risk);
    }

    #[test]
    fn test_cost_basis_fallback() {
        let body = r#"{"conditionId": "0xabc", "size": 10, "avgPrice": 0.4, "outcomeIndex": 1}"#;
        let row: PositionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(row.cost_basis(), dec!(4.0));
    }
}
