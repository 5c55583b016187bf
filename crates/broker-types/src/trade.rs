use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::sub_order::Status;

/// The venue-terminal record of a sub-order's fill or cancellation. At most
/// one per sub-order, see `broker-engine::on_trade`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub exchange: String,
    pub exchange_order_id: String,
    pub price: Decimal,
    pub amount: Decimal,
    /// Only `Filled` or `Canceled` are legal here.
    pub status: Status,
}
