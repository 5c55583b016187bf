use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::order::BlockchainOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// `1` for buy, `0` for sell, the single byte the on-chain order hash
    /// dedicates to side.
    pub fn buy_side_byte(self) -> u8 {
        matches!(self, Side::Buy) as u8
    }
}

/// The five states a sub-order can occupy. Once a variant in
/// `{Filled, Canceled, Rejected}` is reached it never changes, enforced by
/// `broker-store`/`broker-engine`, not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Status {
    Prepare,
    Accepted,
    Filled,
    Canceled,
    Rejected,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Filled | Status::Canceled | Status::Rejected)
    }
}

/// Inbound request from the hub's `create_sub_order` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubOrder {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub exchange: String,
}

/// A single hub-dispatched sub-order. The sole mutator is `broker-engine`;
/// `broker-store` only persists whatever it's handed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubOrder {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub exchange: String,
    /// ms since epoch, assigned on insert.
    pub timestamp: i64,
    pub status: Status,
    pub filled_amount: Decimal,
    pub exchange_order_id: Option<String>,
    pub sent_to_aggregator: bool,
    /// Flags intent rather than blocking the create handler on a cancel
    /// that arrives while still `Prepare`: if set when submit resolves to
    /// `Accepted`, the engine immediately issues a cancel.
    #[serde(default)]
    pub cancel_requested: bool,
}

impl SubOrder {
    pub fn new(req: CreateSubOrder, timestamp: i64) -> Self {
        Self {
            id: req.id,
            symbol: req.symbol,
            side: req.side,
            price: req.price,
            amount: req.amount,
            exchange: req.exchange,
            timestamp,
            status: Status::Prepare,
            filled_amount: Decimal::ZERO,
            exchange_order_id: None,
            sent_to_aggregator: false,
            cancel_requested: false,
        }
    }
}

/// What the hub gateway actually reports out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubOrderStatus {
    pub id: i64,
    /// `None` only for the "hub polled an id we haven't persisted yet"
    /// edge case.
    pub status: Option<Status>,
    pub filled_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockchain_order: Option<BlockchainOrder>,
}
