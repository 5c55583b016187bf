use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum TxStatus {
    Pending,
    Ok,
    Fail,
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// Which on-chain write produced this transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TxMethod {
    DepositEth,
    DepositErc20,
    Withdraw,
    ApproveErc20,
    LockStake,
    ReleaseStake,
}

/// An on-chain transaction the broker itself broadcast. Terminal statuses
/// are sticky; a `Pending` older than 10 minutes with no
/// gateway answer is promoted to `Fail` by the Transactions reconciler loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_hash: String,
    pub method: TxMethod,
    pub asset: String,
    pub amount: Decimal,
    /// ms since epoch.
    pub create_time: i64,
    pub status: TxStatus,
}
