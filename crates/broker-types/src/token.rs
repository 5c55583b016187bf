use std::collections::HashMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// One entry of the process-wide token-symbol registry. Decimals matter for
/// converting venue-side `Decimal` quantities into the 1e8 base-unit
/// integers the on-chain order uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u8,
}

/// Symbol -> address/decimals, initialized once at startup (by the
/// supervisor, from config) and handed to `broker-chain`/`broker-exchange`
/// by `Arc` reference.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry(HashMap<String, TokenInfo>);

impl TokenRegistry {
    pub fn new(tokens: HashMap<String, TokenInfo>) -> Self {
        Self(tokens)
    }

    pub fn get(&self, symbol: &str) -> Option<TokenInfo> {
        self.0.get(symbol).copied()
    }

    pub fn address_of(&self, symbol: &str) -> Option<Address> {
        self.get(symbol).map(|t| t.address)
    }
}
