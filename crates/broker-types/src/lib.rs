//! Shared data model for the broker: the types every other crate in this
//! workspace passes across its trait boundaries.

pub mod order;
pub mod sub_order;
pub mod token;
pub mod trade;
pub mod transaction;
pub mod withdrawal;

pub use order::{BlockchainOrder, DEFAULT_EXPIRATION_MS};
pub use sub_order::{CreateSubOrder, Side, SubOrder, SubOrderStatus, Status};
pub use token::{TokenInfo, TokenRegistry};
pub use trade::Trade;
pub use transaction::{Transaction, TxMethod, TxStatus};
pub use withdrawal::{Withdrawal, WithdrawalStatus};

/// A venue/exchange identifier, e.g. `"binance"`. Kept as a plain `String`
/// rather than an enum: the set of venues is operator configuration, not a
/// compile-time constant (see `broker-exchange`).
pub type Exchange = String;

/// Liability reported read-only from the chain.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Liability {
    pub asset_name: String,
    pub outstanding_amount: rust_decimal::Decimal,
    /// ms since epoch, when this liability was first observed outstanding.
    pub timestamp: i64,
}
