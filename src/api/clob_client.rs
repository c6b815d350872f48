//! Polymarket CLOB connector for executing replication legs.
//!
//! Orders are EIP-712 signed fill-or-kill orders against the CTF Exchange.
//! Authenticated endpoints use L2 (HMAC-SHA256) headers derived from the
//! API secret.

use alloy_primitives::{Address, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE as BASE64_URL_SAFE},
    Engine,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::{from_units, to_units, ConnectorRef, Outcome, COLLATERAL_DECIMALS};
use crate::trading::{
    ConfirmationOutcome, Connector, ConnectorError, ExecutionCost, Submission, TokenKind, TradeOp,
};

type HmacSha256 = Hmac<Sha256>;

/// CLOB API base URL
pub const CLOB_URL: &str = "https://clob.polymarket.com";

/// Polymarket CTF Exchange contract on Polygon
pub const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
/// Neg Risk CTF Exchange for multi-outcome markets
pub const NEG_RISK_CTF_EXCHANGE: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";
/// USDC.e on Polygon
pub const USDC_ADDRESS: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
const ORDER_POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_ORDER_POLLS: u32 = 300;

/// Order side in the CLOB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_u8(&self) -> u8 {
        match self {
            OrderSide::Buy => 0,
            OrderSide::Sell => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Fill-or-kill market order
    Fok,
}

/// Signature type for CLOB orders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    /// EOA signature
    Eoa = 0,
}

/// Signed order ready for submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: String,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub side: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub signature_type: u8,
    pub signature: String,
}

/// Order submission request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub order: SignedOrder,
    pub owner: String,
    pub order_type: OrderType,
}

/// Response from order placement
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "errorMsg")]
    pub error_msg: String,
    #[serde(default, rename = "orderID")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "transactionsHashes")]
    pub transaction_hashes: Vec<String>,
}

/// Order status response
#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatus {
    pub id: String,
    pub status: String,
    pub side: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub original_size: String,
    #[serde(default)]
    pub size_matched: String,
    #[serde(default)]
    pub price: String,
}

/// Market information from the CLOB
#[derive(Debug, Clone, Deserialize)]
pub struct MarketInfo {
    pub condition_id: String,
    pub tokens: Vec<TokenInfo>,
    #[serde(default)]
    pub neg_risk: bool,
    #[serde(default)]
    pub closed: bool,
}

/// Token information for a market outcome
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    pub token_id: String,
    #[serde(default)]
    pub outcome: String,
}

/// Order book entry
#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    pub price: String,
    pub size: String,
}

/// Order book response
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

/// Response from /balance-allowance
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceAllowance {
    pub balance: String,
    #[serde(default)]
    pub allowance: Option<String>,
    /// Per-spender allowances, keyed by exchange address
    #[serde(default)]
    pub allowances: HashMap<String, String>,
}

impl BalanceAllowance {
    /// Allowance granted to `spender`, falling back to the single-spender field.
    pub fn allowance_for(&self, spender: &str) -> u64 {
        self.allowances
            .iter()
            .find(|(address, _)| address.eq_ignore_ascii_case(spender))
            .map(|(_, value)| value.as_str())
            .or(self.allowance.as_deref())
            .map(parse_units)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FeeRate {
    #[serde(alias = "fee_rate_bps")]
    base_fee: u64,
}

/// L2 API credentials.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
    pub passphrase: String,
}

/// Live connector that replicates positions on the Polymarket CLOB.
pub struct ClobConnector {
    http: Client,
    base_url: String,
    signer: PrivateKeySigner,
    credentials: ApiCredentials,
    chain_id: u64,
}

impl ClobConnector {
    /// Create a new CLOB connector.
    ///
    /// # Arguments
    /// * `private_key` - Ethereum private key (hex string, with or without 0x prefix)
    /// * `credentials` - Polymarket L2 API key, secret and passphrase
    /// * `chain_id` - Polygon chain ID (137 for mainnet, 80002 for Amoy testnet)
    pub fn new(private_key: &str, credentials: ApiCredentials, chain_id: u64) -> Result<Self> {
        let pk = private_key.strip_prefix("0x").unwrap_or(private_key);
        let signer = PrivateKeySigner::from_str(pk).context("Invalid private key")?;

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: CLOB_URL.to_string(),
            signer,
            credentials,
            chain_id,
        })
    }

    /// Point the connector at another CLOB deployment.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Get the wallet address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        authenticated: bool,
    ) -> Result<T, ConnectorError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "CLOB request");

        let mut request = self.http.get(&url).query(query);
        if authenticated {
            request = request.headers(self.l2_headers("GET", path, "")?);
        }

        let response = request.send().await?;
        read_json(response, path).await
    }

    async fn balance_allowance(
        &self,
        token: TokenKind,
        venue: &ConnectorRef,
    ) -> Result<BalanceAllowance, ConnectorError> {
        self.get_json("/balance-allowance", &asset_query(token, venue), true)
            .await
    }

    async fn order_book(&self, token_id: &str) -> Result<OrderBook, ConnectorError> {
        self.get_json("/book", &[("token_id", token_id.to_string())], false)
            .await
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, ConnectorError> {
        self.get_json(&format!("/data/order/{}", order_id), &[], true)
            .await
    }

    /// Build L2 authentication headers for a request.
    fn l2_headers(&self, method: &str, path: &str, body: &str) -> Result<HeaderMap, ConnectorError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = l2_signature(&self.credentials.secret, &timestamp, method, path, body)?;

        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("poly_address", self.address().to_checksum(None)),
            ("poly_signature", signature),
            ("poly_timestamp", timestamp),
            ("poly_api_key", self.credentials.key.clone()),
            ("poly_passphrase", self.credentials.passphrase.clone()),
        ] {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| ConnectorError::Fatal(format!("invalid {} header: {}", name, e)))?;
            headers.insert(HeaderName::from_static(name), value);
        }

        Ok(headers)
    }

    /// Build a signed fill-or-kill order.
    async fn build_signed_order(
        &self,
        token_id: &str,
        side: OrderSide,
        maker_amount: u64,
        taker_amount: u64,
        fee_rate_bps: u64,
        exchange: &str,
    ) -> Result<SignedOrder> {
        let maker = self.address().to_checksum(None);
        let signer = maker.clone();
        let taker = ZERO_ADDRESS.to_string();

        // Market orders must not expire; the exchange nonce stays at zero because
        // orders are cancelled by id.
        let expiration = "0".to_string();
        let nonce = "0".to_string();
        let salt = Self::generate_salt();

        let maker_amount = maker_amount.to_string();
        let taker_amount = taker_amount.to_string();
        let fee_rate_bps = fee_rate_bps.to_string();

        let order_hash = Self::compute_order_hash(
            &salt,
            &maker,
            &signer,
            &taker,
            token_id,
            &maker_amount,
            &taker_amount,
            &expiration,
            &nonce,
            &fee_rate_bps,
            side.as_u8(),
        )?;
        let domain_hash = Self::compute_domain_separator(self.chain_id, exchange)?;

        // keccak256("\x19\x01" + domainSeparator + orderHash)
        let mut message = vec![0x19, 0x01];
        message.extend_from_slice(&domain_hash);
        message.extend_from_slice(&order_hash);
        let final_hash = alloy_primitives::keccak256(&message);

        let signature = self
            .signer
            .sign_hash(&final_hash)
            .await
            .context("Failed to sign order")?;

        Ok(SignedOrder {
            salt,
            maker,
            signer,
            taker,
            token_id: token_id.to_string(),
            maker_amount,
            taker_amount,
            side: side.as_str().to_string(),
            expiration,
            nonce,
            fee_rate_bps,
            signature_type: SignatureType::Eoa as u8,
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        })
    }

    /// Compute the EIP-712 order struct hash.
    #[allow(clippy::too_many_arguments)]
    fn compute_order_hash(
        salt: &str,
        maker: &str,
        signer: &str,
        taker: &str,
        token_id: &str,
        maker_amount: &str,
        taker_amount: &str,
        expiration: &str,
        nonce: &str,
        fee_rate_bps: &str,
        side: u8,
    ) -> Result<[u8; 32]> {
        let type_hash = alloy_primitives::keccak256(
            b"Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)"
        );

        let mut encoded = Vec::with_capacity(13 * 32);
        encoded.extend_from_slice(type_hash.as_slice());
        encoded.extend_from_slice(&Self::encode_uint256(salt)?);
        encoded.extend_from_slice(&Self::encode_address(maker)?);
        encoded.extend_from_slice(&Self::encode_address(signer)?);
        encoded.extend_from_slice(&Self::encode_address(taker)?);
        encoded.extend_from_slice(&Self::encode_uint256(token_id)?);
        encoded.extend_from_slice(&Self::encode_uint256(maker_amount)?);
        encoded.extend_from_slice(&Self::encode_uint256(taker_amount)?);
        encoded.extend_from_slice(&Self::encode_uint256(expiration)?);
        encoded.extend_from_slice(&Self::encode_uint256(nonce)?);
        encoded.extend_from_slice(&Self::encode_uint256(fee_rate_bps)?);
        encoded.extend_from_slice(&Self::encode_uint8(side));
        encoded.extend_from_slice(&Self::encode_uint8(SignatureType::Eoa as u8));

        Ok(alloy_primitives::keccak256(&encoded).0)
    }

    /// Compute the EIP-712 domain separator for one exchange contract.
    fn compute_domain_separator(chain_id: u64, exchange: &str) -> Result<[u8; 32]> {
        let type_hash = alloy_primitives::keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)"
        );
        let name_hash = alloy_primitives::keccak256(b"Polymarket CTF Exchange");
        let version_hash = alloy_primitives::keccak256(b"1");

        let mut encoded = Vec::with_capacity(5 * 32);
        encoded.extend_from_slice(type_hash.as_slice());
        encoded.extend_from_slice(name_hash.as_slice());
        encoded.extend_from_slice(version_hash.as_slice());
        encoded.extend_from_slice(&Self::encode_uint256(&chain_id.to_string())?);
        encoded.extend_from_slice(&Self::encode_address(exchange)?);

        Ok(alloy_primitives::keccak256(&encoded).0)
    }

    /// Encode address to 32-byte padded format.
    fn encode_address(addr: &str) -> Result<[u8; 32]> {
        let addr = Address::from_str(addr).with_context(|| format!("Invalid address: {}", addr))?;
        let mut buf = [0u8; 32];
        buf[12..].copy_from_slice(addr.as_slice());
        Ok(buf)
    }

    /// Encode uint256 from a decimal string.
    fn encode_uint256(value: &str) -> Result<[u8; 32]> {
        let n = U256::from_str(value).map_err(|e| anyhow!("Invalid uint256 {}: {}", value, e))?;
        Ok(n.to_be_bytes())
    }

    /// Encode uint8 to 32-byte padded format.
    fn encode_uint8(value: u8) -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[31] = value;
        buf
    }

    fn generate_salt() -> String {
        uuid::Uuid::new_v4().as_u128().to_string()
    }
}

/// Helper to create a connector from environment variables.
impl ClobConnector {
    /// Create from environment variables:
    /// - POLYMARKET_PRIVATE_KEY
    /// - POLYMARKET_API_KEY
    /// - POLYMARKET_API_SECRET
    /// - POLYMARKET_API_PASSPHRASE
    /// - POLYMARKET_CHAIN_ID (defaults to 137)
    pub fn from_env() -> Result<Self> {
        let private_key = std::env::var("POLYMARKET_PRIVATE_KEY")
            .context("POLYMARKET_PRIVATE_KEY not set")?;
        let credentials = ApiCredentials {
            key: std::env::var("POLYMARKET_API_KEY").context("POLYMARKET_API_KEY not set")?,
            secret: std::env::var("POLYMARKET_API_SECRET")
                .context("POLYMARKET_API_SECRET not set")?,
            passphrase: std::env::var("POLYMARKET_API_PASSPHRASE")
                .context("POLYMARKET_API_PASSPHRASE not set")?,
        };
        let chain_id: u64 = std::env::var("POLYMARKET_CHAIN_ID")
            .unwrap_or_else(|_| "137".to_string())
            .parse()
            .context("Invalid POLYMARKET_CHAIN_ID")?;

        Self::new(&private_key, credentials, chain_id)
    }
}

#[async_trait]
impl Connector for ClobConnector {
    async fn resolve_market(
        &self,
        market_id: &str,
        outcome: Outcome,
    ) -> Result<ConnectorRef, ConnectorError> {
        let market: MarketInfo = self
            .get_json(&format!("/markets/{}", market_id), &[], false)
            .await?;

        if market.closed {
            return Err(ConnectorError::Fatal(format!(
                "market {} is closed for trading",
                market.condition_id
            )));
        }

        let token = market.tokens.get(outcome.index()).ok_or_else(|| {
            ConnectorError::Fatal(format!(
                "market {} has no token for {}",
                market.condition_id, outcome
            ))
        })?;

        let exchange = if market.neg_risk {
            NEG_RISK_CTF_EXCHANGE
        } else {
            CTF_EXCHANGE
        };

        debug!(market = %market_id, outcome = %outcome, token = %token.outcome, neg_risk = market.neg_risk, "Resolved market");

        Ok(ConnectorRef {
            market_address: exchange.to_string(),
            collateral_token: USDC_ADDRESS.to_string(),
            outcome_token: token.token_id.clone(),
            decimals: COLLATERAL_DECIMALS,
        })
    }

    async fn get_balance(
        &self,
        venue: &ConnectorRef,
        token: TokenKind,
    ) -> Result<u64, ConnectorError> {
        let response = self.balance_allowance(token, venue).await?;
        Ok(parse_units(&response.balance))
    }

    async fn get_allowance(
        &self,
        venue: &ConnectorRef,
        token: TokenKind,
    ) -> Result<u64, ConnectorError> {
        let response = self.balance_allowance(token, venue).await?;
        Ok(response.allowance_for(&venue.market_address))
    }

    /// Refresh the CLOB's cached allowance, then check it covers `amount`.
    ///
    /// Granting the allowance itself is an on-chain transaction made from the
    /// wallet; the CLOB only observes it.
    async fn approve(
        &self,
        venue: &ConnectorRef,
        token: TokenKind,
        amount: u64,
    ) -> Result<(), ConnectorError> {
        let path = "/balance-allowance/update";
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(&asset_query(token, venue))
            .headers(self.l2_headers("GET", path, "")?)
            .send()
            .await?;
        // The update endpoint answers with an empty body on success.
        check_status(response, path).await?;

        let allowance = self.get_allowance(venue, token).await?;
        if allowance < amount {
            return Err(ConnectorError::Fatal(format!(
                "allowance for {} is {} after refresh, need {}; approve the exchange on-chain",
                venue.market_address, allowance, amount
            )));
        }

        info!(exchange = %venue.market_address, allowance, "Allowance refreshed");
        Ok(())
    }

    async fn quote(&self, op: &TradeOp) -> Result<u64, ConnectorError> {
        let (side, token_id, maker_amount) = order_leg(op)?;
        let book = self.order_book(token_id).await?;

        let expected = match side {
            OrderSide::Buy => walk_asks(
                &parse_levels(&book.asks),
                from_units(maker_amount, COLLATERAL_DECIMALS),
            ),
            OrderSide::Sell => walk_bids(
                &parse_levels(&book.bids),
                from_units(maker_amount, COLLATERAL_DECIMALS),
            ),
        };

        Ok(to_units(expected, COLLATERAL_DECIMALS))
    }

    async fn estimate_effort(&self, op: &TradeOp) -> Result<ExecutionCost, ConnectorError> {
        let (_, token_id, _) = order_leg(op)?;
        let fee: FeeRate = self
            .get_json("/fee-rate", &[("token_id", token_id.to_string())], false)
            .await?;

        Ok(ExecutionCost {
            units: 1,
            unit_price: fee.base_fee,
        })
    }

    async fn submit(
        &self,
        op: &TradeOp,
        min_output: u64,
        fee_ceiling: u64,
    ) -> Result<Submission, ConnectorError> {
        let (side, token_id, maker_amount) = order_leg(op)?;

        let order = self
            .build_signed_order(
                token_id,
                side,
                maker_amount,
                min_output,
                fee_ceiling,
                &op.venue().market_address,
            )
            .await
            .map_err(|e| ConnectorError::Fatal(format!("{:#}", e)))?;

        let payload = OrderPayload {
            order,
            owner: self.credentials.key.clone(),
            order_type: OrderType::Fok,
        };
        let body = serde_json::to_string(&payload)
            .map_err(|e| ConnectorError::Fatal(format!("failed to encode order: {}", e)))?;

        let mut headers = self.l2_headers("POST", "/order", &body)?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let response = self
            .http
            .post(format!("{}/order", self.base_url))
            .headers(headers)
            .body(body)
            .send()
            .await?;
        let placed: OrderResponse = read_json(response, "/order").await?;

        let order_id = match placed.order_id {
            Some(id) if placed.success && !id.is_empty() => id,
            _ => {
                return Err(ConnectorError::Fatal(format!(
                    "order rejected: {}",
                    placed.error_msg
                )))
            }
        };

        info!(
            order_id = %order_id,
            side = side.as_str(),
            token_id = %token_id,
            status = placed.status.as_deref().unwrap_or("unknown"),
            tx_hashes = ?placed.transaction_hashes,
            "Order placed"
        );

        // CLOB fees are taken out of the fill itself.
        Ok(Submission {
            handle: order_id,
            cost: ExecutionCost::default(),
        })
    }

    /// Poll the order until it has been seen matched `confirmations` times in a row.
    async fn await_confirmation(
        &self,
        handle: &str,
        confirmations: u32,
    ) -> Result<ConfirmationOutcome, ConnectorError> {
        let required = confirmations.max(1);
        let mut matched = 0;

        for _ in 0..MAX_ORDER_POLLS {
            match self.order_status(handle).await {
                Ok(order) => match order.status.to_uppercase().as_str() {
                    "MATCHED" => {
                        matched += 1;
                        if matched >= required {
                            let output_amount = fill_output(&order)?;
                            return Ok(ConfirmationOutcome::Confirmed { output_amount });
                        }
                    }
                    "CANCELED" | "CANCELLED" | "UNMATCHED" => {
                        return Ok(ConfirmationOutcome::Reverted {
                            reason: format!("order {}", order.status.to_lowercase()),
                        });
                    }
                    _ => matched = 0,
                },
                Err(e) if e.is_transient() => {
                    warn!(order_id = %handle, error = %e, "Order status poll failed");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(ORDER_POLL_INTERVAL).await;
        }

        Ok(ConfirmationOutcome::TimedOut)
    }

    /// Resolved markets stop trading on the CLOB; redemption is on-chain.
    fn supports_redeem(&self) -> bool {
        false
    }
}

/// Side, token and maker amount for an op the CLOB can trade.
fn order_leg(op: &TradeOp) -> Result<(OrderSide, &str, u64), ConnectorError> {
    match op {
        TradeOp::Buy { venue, amount, .. } => {
            Ok((OrderSide::Buy, venue.outcome_token.as_str(), *amount))
        }
        TradeOp::Sell { venue, tokens, .. } => {
            Ok((OrderSide::Sell, venue.outcome_token.as_str(), *tokens))
        }
        TradeOp::Redeem { venue, .. } => Err(ConnectorError::Fatal(format!(
            "redemption of {} is not supported by the CLOB; redeem on-chain",
            venue.outcome_token
        ))),
    }
}

fn asset_query(token: TokenKind, venue: &ConnectorRef) -> Vec<(&'static str, String)> {
    match token {
        TokenKind::Collateral => vec![
            ("asset_type", "COLLATERAL".to_string()),
            ("signature_type", "0".to_string()),
        ],
        TokenKind::Outcome(_) => vec![
            ("asset_type", "CONDITIONAL".to_string()),
            ("token_id", venue.outcome_token.clone()),
            ("signature_type", "0".to_string()),
        ],
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response, ConnectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = format!("{} failed: {} - {}", what, status, text);
    Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ConnectorError::Transient(message)
    } else {
        ConnectorError::Fatal(message)
    })
}

async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ConnectorError> {
    check_status(response, what)
        .await?
        .json()
        .await
        .map_err(|e| ConnectorError::Fatal(format!("failed to parse {} response: {}", what, e)))
}

/// L2 request signature: base64url(HMAC-SHA256(secret, timestamp + method + path + body)).
fn l2_signature(
    secret: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, ConnectorError> {
    let key = BASE64_URL_SAFE
        .decode(secret)
        .or_else(|_| BASE64_STANDARD.decode(secret))
        .map_err(|e| ConnectorError::Fatal(format!("invalid API secret: {}", e)))?;

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ConnectorError::Fatal(format!("invalid HMAC key: {}", e)))?;
    mac.update(format!("{}{}{}{}", timestamp, method, path, body).as_bytes());

    Ok(BASE64_URL_SAFE.encode(mac.finalize().into_bytes()))
}

/// Balances and allowances come back as integer base-unit strings.
fn parse_units(value: &str) -> u64 {
    let value = value.trim();
    value.parse::<u64>().unwrap_or_else(|_| {
        // Allowances can exceed u64 (max uint256 approvals)
        if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
            u64::MAX
        } else {
            0
        }
    })
}

fn parse_levels(levels: &[BookLevel]) -> Vec<(Decimal, Decimal)> {
    levels
        .iter()
        .filter_map(|level| {
            let price = Decimal::from_str(&level.price).ok()?;
            let size = Decimal::from_str(&level.size).ok()?;
            (price > Decimal::ZERO && size > Decimal::ZERO).then_some((price, size))
        })
        .collect()
}

/// Outcome tokens received for spending `spend` collateral, cheapest asks first.
fn walk_asks(asks: &[(Decimal, Decimal)], spend: Decimal) -> Decimal {
    let mut asks = asks.to_vec();
    asks.sort_by(|a, b| a.0.cmp(&b.0));

    let mut remaining = spend;
    let mut tokens = Decimal::ZERO;
    for (price, size) in asks {
        if remaining <= Decimal::ZERO {
            break;
        }
        let level_cost = price * size;
        if level_cost >= remaining {
            tokens += remaining / price;
            remaining = Decimal::ZERO;
        } else {
            tokens += size;
            remaining -= level_cost;
        }
    }
    tokens
}

/// Collateral received for selling `tokens`, best bids first.
fn walk_bids(bids: &[(Decimal, Decimal)], tokens: Decimal) -> Decimal {
    let mut bids = bids.to_vec();
    bids.sort_by(|a, b| b.0.cmp(&a.0));

    let mut remaining = tokens;
    let mut proceeds = Decimal::ZERO;
    for (price, size) in bids {
        if remaining <= Decimal::ZERO {
            break;
        }
        let filled = remaining.min(size);
        proceeds += filled * price;
        remaining -= filled;
    }
    proceeds
}

/// Amount received by a matched order: tokens for a buy, collateral for a sell.
fn fill_output(order: &OrderStatus) -> Result<u64, ConnectorError> {
    let size = Decimal::from_str(&order.size_matched).map_err(|e| {
        ConnectorError::Fatal(format!("order {} has bad size_matched: {}", order.id, e))
    })?;

    let amount = if order.side.eq_ignore_ascii_case("SELL") {
        let price = Decimal::from_str(&order.price).map_err(|e| {
            ConnectorError::Fatal(format!("order {} has bad price: {}", order.id, e))
        })?;
        size * price
    } else {
        size
    };

    Ok(to_units(amount, COLLATERAL_DECIMALS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TEST_KEY: &str = "0x0101010101010101010101010101010101010101010101010101010101010101";

    fn connector() -> ClobConnector {
        let credentials = ApiCredentials {
            key: "api-key".to_string(),
            secret: BASE64_URL_SAFE.encode(b"test-secret-material"),
            passphrase: "pass".to_string(),
        };
        ClobConnector::new(TEST_KEY, credentials, 137).unwrap()
    }

    fn venue() -> ConnectorRef {
        ConnectorRef {
            market_address: CTF_EXCHANGE.to_string(),
            collateral_token: USDC_ADDRESS.to_string(),
            outcome_token: "12345".to_string(),
            decimals: COLLATERAL_DECIMALS,
        }
    }

    #[test]
    fn test_l2_signature_is_deterministic() {
        let secret = BASE64_URL_SAFE.encode(b"test-secret-material");
        let a = l2_signature(&secret, "1700000000", "POST", "/order", "{}").unwrap();
        let b = l2_signature(&secret, "1700000000", "POST", "/order", "{}").unwrap();
        let c = l2_signature(&secret, "1700000000", "POST", "/order", "{\"x\":1}").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(BASE64_URL_SAFE.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_l2_signature_accepts_standard_base64_secret() {
        let secret = BASE64_STANDARD.encode([0xfbu8; 24]);
        assert!(l2_signature(&secret, "1", "GET", "/book", "").is_ok());
        assert!(l2_signature("not base64!", "1", "GET", "/book", "").is_err());
    }

    #[test]
    fn test_order_leg_encodes_amounts() {
        let buy = TradeOp::Buy {
            venue: venue(),
            outcome: Outcome::SideA,
            amount: 10_000_000,
        };
        let (side, token, amount) = order_leg(&buy).unwrap();
        assert_eq!(side, OrderSide::Buy);
        assert_eq!(token, "12345");
        assert_eq!(amount, 10_000_000);

        let sell = TradeOp::Sell {
            venue: venue(),
            outcome: Outcome::SideA,
            tokens: 19_800_000,
        };
        assert_eq!(order_leg(&sell).unwrap().0, OrderSide::Sell);
    }

    #[test]
    fn test_redeem_is_fatal() {
        let redeem = TradeOp::Redeem {
            venue: venue(),
            outcome: Outcome::SideA,
            tokens: 1,
            invested: 1,
            winning_outcome: Outcome::SideA,
        };
        let err = order_leg(&redeem).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_walk_asks_crosses_levels() {
        let asks = vec![(dec!(0.6), dec!(100)), (dec!(0.5), dec!(100))];
        // 50 buys the whole 0.5 level, the remaining 30 buys 50 at 0.6
        assert_eq!(walk_asks(&asks, dec!(80)), dec!(150));
        assert_eq!(walk_asks(&[], dec!(80)), Decimal::ZERO);
    }

    #[test]
    fn test_walk_bids_crosses_levels() {
        let bids = vec![(dec!(0.4), dec!(100)), (dec!(0.5), dec!(100))];
        assert_eq!(walk_bids(&bids, dec!(150)), dec!(70));
    }

    #[test]
    fn test_parse_levels_skips_garbage() {
        let levels = vec![
            BookLevel { price: "0.5".to_string(), size: "10".to_string() },
            BookLevel { price: "abc".to_string(), size: "10".to_string() },
            BookLevel { price: "0.4".to_string(), size: "0".to_string() },
        ];
        assert_eq!(parse_levels(&levels), vec![(dec!(0.5), dec!(10))]);
    }

    #[test]
    fn test_allowance_lookup() {
        let body = format!(
            r#"{{"balance": "25000000", "allowances": {{"{}": "115792089237316195423570985008687907853269984665640564039457584007913129639935"}}}}"#,
            CTF_EXCHANGE.to_lowercase()
        );
        let response: BalanceAllowance = serde_json::from_str(&body).unwrap();

        assert_eq!(parse_units(&response.balance), 25_000_000);
        assert_eq!(response.allowance_for(CTF_EXCHANGE), u64::MAX);
        assert_eq!(response.allowance_for(NEG_RISK_CTF_EXCHANGE), 0);
    }

    #[test]
    fn test_fill_output() {
        let status = |side: &str| OrderStatus {
            id: "0x1".to_string(),
            status: "MATCHED".to_string(),
            side: side.to_string(),
            asset_id: "12345".to_string(),
            original_size: "20".to_string(),
            size_matched: "19.8".to_string(),
            price: "0.5".to_string(),
        };

        assert_eq!(fill_output(&status("BUY")).unwrap(), 19_800_000);
        assert_eq!(fill_output(&status("SELL")).unwrap(), 9_900_000);
    }

    #[test]
    fn test_domain_separator_depends_on_exchange() {
        let ctf = ClobConnector::compute_domain_separator(137, CTF_EXCHANGE).unwrap();
        let neg = ClobConnector::compute_domain_separator(137, NEG_RISK_CTF_EXCHANGE).unwrap();
        assert_ne!(ctf, neg);
    }

    #[test]
    fn test_encode_uint8() {
        let encoded = ClobConnector::encode_uint8(1);
        assert_eq!(encoded[31], 1);
        assert!(encoded[..31].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_winners_left_for_manual_redemption() {
        assert!(!connector().supports_redeem());
    }

    #[tokio::test]
    async fn test_signed_order_carries_min_output() {
        let clob = connector();
        let order = clob
            .build_signed_order("12345", OrderSide::Buy, 10_000_000, 19_700_000, 100, CTF_EXCHANGE)
            .await
            .unwrap();

        assert_eq!(order.maker_amount, "10000000");
        assert_eq!(order.taker_amount, "19700000");
        assert_eq!(order.fee_rate_bps, "100");
        assert_eq!(order.side, "BUY");
        assert_eq!(order.signature.len(), 2 + 65 * 2);
        assert_eq!(order.maker, clob.address().to_checksum(None));
    }
}
