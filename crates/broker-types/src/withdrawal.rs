use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Ok,
    Failed,
    Canceled,
}

impl WithdrawalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WithdrawalStatus::Pending)
    }
}

/// An exchange withdrawal initiated by the liability-discharge planner.
/// Terminal statuses are sticky.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub exchange_withdraw_id: String,
    pub exchange: String,
    pub currency: String,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
}
