//! DBotX API client
//!
//! DBotX executes copy trades server-side; this client consumes the
//! follow-trade feed for a wallet pair and submits liquidation (sell)
//! orders against the automation endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ApiConfig, SellConfig, WalletConfig};
use crate::error::{Error, Result};

/// Execution state of a follow-trade feed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeState {
    Filled,
    Fail,
    /// Any state the service adds that we do not model; admitted like a fill
    #[serde(other)]
    Other,
}

impl TradeState {
    pub fn is_failed(&self) -> bool {
        matches!(self, TradeState::Fail)
    }
}

/// A follow trade observed on the feed. Immutable once observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowTrade {
    /// Trade id assigned by DBotX
    pub id: String,
    /// Creation timestamp, milliseconds since epoch
    #[serde(rename = "createAt")]
    pub create_at: i64,
    pub state: TradeState,
    /// The leg we received (the bought token)
    pub receive: ReceiveLeg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveLeg {
    pub info: TokenInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub contract: String,
}

impl FollowTrade {
    /// Contract address of the acquired token
    pub fn token_contract(&self) -> &str {
        &self.receive.info.contract
    }
}

/// Response envelope shared by all DBotX endpoints
#[derive(Debug, Clone, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    err: bool,
    res: Option<T>,
}

/// Sell order for the swap_order endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapOrderRequest {
    pub chain: String,
    pub pair: String,
    pub wallet_id: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub gas_fee_delta: u32,
    pub max_fee_per_gas: u32,
    pub max_slippage: f64,
    pub concurrent_nodes: u32,
    pub retries: u32,
    pub amount_or_percent: f64,
}

/// An accepted sell order
#[derive(Debug, Clone, Deserialize)]
pub struct SwapOrder {
    pub id: String,
}

/// The follow-trade feed plus the liquidation endpoint
#[async_trait]
pub trait TradeSource: Send + Sync {
    /// Most recent page of follow buys for the configured wallet pair,
    /// newest-first as returned by the service
    async fn follow_trades(&self) -> Result<Vec<FollowTrade>>;

    /// Liquidate the position held in `token`; returns the accepted order
    async fn sell_all(&self, token: &str) -> Result<SwapOrder>;
}

/// DBotX REST client
pub struct DbotxClient {
    client: Client,
    base_url: String,
    api_key: String,
    page_size: u32,
    wallet: WalletConfig,
    sell: SellConfig,
}

impl DbotxClient {
    pub fn new(api: &ApiConfig, wallet: WalletConfig, sell: SellConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(api.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            api_key: api.key.clone(),
            page_size: api.page_size,
            wallet,
            sell,
        })
    }
}

#[async_trait]
impl TradeSource for DbotxClient {
    async fn follow_trades(&self) -> Result<Vec<FollowTrade>> {
        let url = format!("{}/account/follow_trades", self.base_url);
        let size = self.page_size.to_string();

        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("cache-control", "no-cache")
            .query(&[
                ("chain", self.wallet.chain.as_str()),
                ("type", "buy"),
                ("myWallet", self.wallet.my_wallet.as_str()),
                ("targetWallet", self.wallet.target_wallet.as_str()),
                ("page", "0"),
                ("size", size.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Api(format!("follow_trades request failed: {}", e)))?;

        let envelope: ApiEnvelope<Vec<FollowTrade>> = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(format!("follow_trades response: {}", e)))?;

        if envelope.err {
            return Err(Error::ApiRejected("follow_trades returned err".to_string()));
        }

        envelope
            .res
            .ok_or_else(|| Error::Deserialization("follow_trades response missing res".to_string()))
    }

    async fn sell_all(&self, token: &str) -> Result<SwapOrder> {
        let request = SwapOrderRequest {
            chain: self.wallet.chain.clone(),
            pair: token.to_string(),
            wallet_id: self.wallet.wallet_id.clone(),
            order_type: "sell".to_string(),
            gas_fee_delta: self.sell.gas_fee_delta,
            max_fee_per_gas: self.sell.max_fee_per_gas,
            max_slippage: self.sell.max_slippage,
            concurrent_nodes: self.sell.concurrent_nodes,
            retries: self.sell.retries,
            amount_or_percent: self.sell.amount_or_percent,
        };

        debug!("Submitting sell order for {}", token);

        let url = format!("{}/automation/swap_order", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::SellOrder(format!("swap_order request failed: {}", e)))?;

        let envelope: ApiEnvelope<SwapOrder> = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(format!("swap_order response: {}", e)))?;

        if envelope.err {
            return Err(Error::SellOrder("swap_order returned err".to_string()));
        }

        envelope
            .res
            .ok_or_else(|| Error::SellOrder("No order id in response".to_string()))
    }
}
