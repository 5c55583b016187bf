//! The on-chain limit order the broker signs once a trade fills. Two
//! distinct digests are involved: a raw byte-concatenation hash
//! (`hash_order`, used to fill the order's `id`) and a separate EIP-712
//! typed-data digest (`Order`, used for the operator's settlement
//! signature). `broker-chain` is the only crate that ever constructs a
//! `BlockchainOrder`; this crate just carries the shape so `broker-hub`
//! and `broker-engine` can move it around.

use alloy_primitives::Address;
use alloy_sol_types::sol;
use serde::{Deserialize, Serialize};

/// `29 * 24 * 60 * 60 * 1000` ms.
pub const DEFAULT_EXPIRATION_MS: i64 = 29 * 24 * 60 * 60 * 1_000;

/// `1e8`, the fixed-point scale applied to `amount`/`price` before they're
/// packed into the order's base-unit integer fields.
pub const BASE_UNIT_SCALE: i64 = 100_000_000;

sol! {
    /// The EIP-712 struct signed under the fixed `"Orion Exchange"` domain.
    /// Field order matters: it is part of the typed-data encoding.
    #[derive(Debug, Serialize, Deserialize)]
    struct Order {
        address sender;
        address matcher;
        address baseAsset;
        address quoteAsset;
        address matcherFeeAsset;
        uint64 amount;
        uint64 price;
        uint64 matcherFee;
        uint64 nonce;
        uint64 expiration;
        bool buySide;
    }
}

pub use Order as EipOrder;

/// The broker's on-chain-signed limit order, ready to hand to the
/// aggregator for settlement. `id` and `signature` are both pure functions
/// of the other fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainOrder {
    /// hex-encoded `hash_order(self)`, big-endian, `0x`-prefixed.
    pub id: String,
    pub sender: Address,
    pub matcher: Address,
    pub base_asset: Address,
    pub quote_asset: Address,
    pub matcher_fee_asset: Address,
    pub amount: u64,
    pub price: u64,
    pub matcher_fee: u64,
    pub nonce: u64,
    /// ms since epoch: `timestamp + DEFAULT_EXPIRATION_MS`.
    pub expiration: u64,
    pub buy_side: u8,
    /// hex-encoded 65-byte ECDSA signature over the EIP-712 digest.
    pub signature: String,
}

impl BlockchainOrder {
    /// The domain-separator-tagged byte concatenation: one byte `0x03`,
    /// five 20-byte addresses, five big-endian 8-byte integers, and a final
    /// single side byte. This is *not* the EIP-712 digest that gets signed,
    /// it's the deterministic `id` the protocol uses to address the order.
    pub fn preimage(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 20 * 5 + 8 * 5 + 1);
        buf.push(0x03);
        buf.extend_from_slice(self.sender.as_slice());
        buf.extend_from_slice(self.matcher.as_slice());
        buf.extend_from_slice(self.base_asset.as_slice());
        buf.extend_from_slice(self.quote_asset.as_slice());
        buf.extend_from_slice(self.matcher_fee_asset.as_slice());
        buf.extend_from_slice(&self.amount.to_be_bytes());
        buf.extend_from_slice(&self.price.to_be_bytes());
        buf.extend_from_slice(&self.matcher_fee.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.expiration.to_be_bytes());
        buf.push(self.buy_side);
        buf
    }

    pub fn as_eip712(&self) -> Order {
        Order {
            sender: self.sender,
            matcher: self.matcher,
            baseAsset: self.base_asset,
            quoteAsset: self.quote_asset,
            matcherFeeAsset: self.matcher_fee_asset,
            amount: self.amount,
            price: self.price,
            matcherFee: self.matcher_fee,
            nonce: self.nonce,
            expiration: self.expiration,
            buySide: self.buy_side != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn sample() -> BlockchainOrder {
        BlockchainOrder {
            id: String::new(),
            sender: Address::from_str("0x1111111111111111111111111111111111111111").unwrap(),
            matcher: Address::from_str("0x2222222222222222222222222222222222222222").unwrap(),
            base_asset: Address::from_str("0x3333333333333333333333333333333333333333")
                .unwrap(),
            quote_asset: Address::from_str("0x4444444444444444444444444444444444444444")
                .unwrap(),
            matcher_fee_asset: Address::from_str("0x5555555555555555555555555555555555555555")
                .unwrap(),
            amount: 1_000_000,
            price: 1_000_000_000_000,
            matcher_fee: 0,
            nonce: 7,
            expiration: 1_700_000_000_000,
            buy_side: 1,
            signature: String::new(),
        }
    }

    #[test]
    fn preimage_length_is_exact() {
        let order = sample();
        assert_eq!(order.preimage().len(), 1 + 20 * 5 + 8 * 5 + 1);
    }

    #[test]
    fn preimage_changes_with_any_field() {
        let a = sample();
        let mut b = sample();
        b.nonce += 1;
        assert_ne!(a.preimage(), b.preimage());

        let mut c = sample();
        c.buy_side = 0;
        assert_ne!(a.preimage(), c.preimage());
    }
}
