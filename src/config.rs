//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub keeper: KeeperConfig,
    #[serde(default)]
    pub sell: SellConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// DBotX API key; prefer supplying it via KEEPER_API__KEY
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Wallet pair being followed plus the wallet used to execute sells
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub chain: String,
    pub wallet_id: String,
    pub my_wallet: String,
    pub target_wallet: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    /// How long to hold a followed position before liquidating it
    #[serde(default = "default_sell_delay_seconds")]
    pub sell_delay_seconds: u64,
    /// Feed poll cadence, also the retry delay after a feed error
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Liquidation loop idle wait; bounds how late past its deadline a
    /// sell can land
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    #[serde(default = "default_watermark_path")]
    pub watermark_path: String,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            sell_delay_seconds: default_sell_delay_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            watermark_path: default_watermark_path(),
        }
    }
}

/// Parameters forwarded on every sell order
#[derive(Debug, Clone, Deserialize)]
pub struct SellConfig {
    #[serde(default = "default_max_slippage")]
    pub max_slippage: f64,
    #[serde(default = "default_gas_fee_delta")]
    pub gas_fee_delta: u32,
    #[serde(default = "default_max_fee_per_gas")]
    pub max_fee_per_gas: u32,
    #[serde(default = "default_concurrent_nodes")]
    pub concurrent_nodes: u32,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Fraction of the position to sell; 1.0 liquidates in full
    #[serde(default = "default_amount_or_percent")]
    pub amount_or_percent: f64,
}

impl Default for SellConfig {
    fn default() -> Self {
        Self {
            max_slippage: default_max_slippage(),
            gas_fee_delta: default_gas_fee_delta(),
            max_fee_per_gas: default_max_fee_per_gas(),
            concurrent_nodes: default_concurrent_nodes(),
            retries: default_retries(),
            amount_or_percent: default_amount_or_percent(),
        }
    }
}

// Default value functions
fn default_base_url() -> String {
    "https://api-bot-v1.dbotx.com".into()
}

fn default_timeout_ms() -> u64 {
    10000
}

fn default_page_size() -> u32 {
    20
}

fn default_sell_delay_seconds() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_idle_interval_ms() -> u64 {
    100
}

fn default_watermark_path() -> String {
    "data/watermark.json".into()
}

fn default_max_slippage() -> f64 {
    0.1
}

fn default_gas_fee_delta() -> u32 {
    15
}

fn default_max_fee_per_gas() -> u32 {
    100
}

fn default_concurrent_nodes() -> u32 {
    2
}

fn default_retries() -> u32 {
    5
}

fn default_amount_or_percent() -> f64 {
    1.0
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix KEEPER_)
            .add_source(
                config::Environment::with_prefix("KEEPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.api.key.is_empty() {
            anyhow::bail!("api.key is required (set KEEPER_API__KEY)");
        }

        if self.keeper.sell_delay_seconds == 0 {
            anyhow::bail!("keeper.sell_delay_seconds must be positive");
        }

        if self.sell.max_slippage <= 0.0 || self.sell.max_slippage > 1.0 {
            anyhow::bail!("sell.max_slippage must be in (0, 1]");
        }

        if self.sell.amount_or_percent <= 0.0 || self.sell.amount_or_percent > 1.0 {
            anyhow::bail!("sell.amount_or_percent must be in (0, 1]");
        }

        if self.wallet.wallet_id.is_empty() {
            anyhow::bail!("wallet.wallet_id is required");
        }

        // Validate wallet addresses
        for (name, address) in [
            ("my_wallet", &self.wallet.my_wallet),
            ("target_wallet", &self.wallet.target_wallet),
        ] {
            if !is_evm_address(address) {
                anyhow::bail!("Invalid wallet.{} address: {}", name, address);
            }
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Api:
    base_url: {}
    key: {}
    timeout: {}ms
    page_size: {}
  Wallet:
    chain: {}
    wallet_id: {}
    my_wallet: {}
    target_wallet: {}
  Keeper:
    sell_delay: {}s
    poll_interval: {}ms
    idle_interval: {}ms
    watermark_path: {}
  Sell:
    max_slippage: {}
    gas_fee_delta: {}
    max_fee_per_gas: {}
    concurrent_nodes: {}
    retries: {}
    amount_or_percent: {}
"#,
            self.api.base_url,
            if self.api.key.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.api.timeout_ms,
            self.api.page_size,
            self.wallet.chain,
            self.wallet.wallet_id,
            self.wallet.my_wallet,
            self.wallet.target_wallet,
            self.keeper.sell_delay_seconds,
            self.keeper.poll_interval_ms,
            self.keeper.idle_interval_ms,
            self.keeper.watermark_path,
            self.sell.max_slippage,
            self.sell.gas_fee_delta,
            self.sell.max_fee_per_gas,
            self.sell.concurrent_nodes,
            self.sell.retries,
            self.sell.amount_or_percent,
        )
    }
}

/// Check address format: 0x followed by 40 hex characters
fn is_evm_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}
