//! `BrokerConfig`: everything the supervisor needs to wire the store,
//! adapters, chain client, hub gateway, engine, and reconciler without a
//! code change, loaded from a TOML file named by the CLI via a
//! `serde`-derived struct.

use std::collections::HashMap;

use alloy_primitives::Address;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct BrokerConfig {
    /// Websocket URL of the hub transport.
    pub hub_url: String,
    /// Overridable version of the "due period" constant used by
    /// `manageLiability`.
    pub due_period_seconds: i64,
    pub chain: ChainConfig,
    pub tokens: Vec<TokenEntry>,
    pub exchanges: Vec<ExchangeEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub gateway_url: String,
    pub gas_station_url: String,
    pub contract_address: Address,
    pub broker_address: Address,
    pub matcher_address: Address,
    /// `ORN`'s on-chain address; the symbol itself must also appear in
    /// `tokens` (checked at startup).
    pub fee_asset: Address,
}

#[derive(Debug, Deserialize)]
pub struct TokenEntry {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeEntry {
    pub name: String,
    pub base_url: String,
    /// Name of the environment variable holding the venue's API key, kept
    /// out of the config file itself.
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub requires_transfer_before_withdraw: bool,
    pub withdraw_source_account: Option<String>,
}

impl BrokerConfig {
    pub fn token_map(&self) -> HashMap<String, broker_types::token::TokenInfo> {
        self.tokens
            .iter()
            .map(|t| (t.symbol.clone(), broker_types::token::TokenInfo { address: t.address, decimals: t.decimals }))
            .collect()
    }
}
