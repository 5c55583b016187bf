//! Durable keyed storage for sub-orders, trades, withdrawals and on-chain
//! transactions. The current backend is an in-memory
//! `parking_lot::Mutex`-guarded index: every sub-pool lives behind its own
//! lock, and the struct as a whole is cheaply `Clone` because the locks sit
//! behind `Arc`s. `Store` is a trait so a durable backend can be swapped in
//! later without touching any caller in `broker-engine` or
//! `broker-reconciler`.

use std::sync::Arc;

use broker_types::{SubOrder, Trade, Transaction, TxStatus, Withdrawal, WithdrawalStatus};
pub use broker_types::sub_order::Status;

mod memory;

pub use memory::InMemoryStore;

/// All operations are safe under concurrent calls from the reconciler loops
/// and the hub-inbound handlers; none of them suspend, so callers may hold
/// other locks across a `Store` call without risking deadlock-by-await.
pub trait StoreHandle: Clone + Send + Sync + 'static {
    fn insert_sub_order(&self, sub_order: SubOrder);
    fn update_sub_order(&self, sub_order: SubOrder);
    fn get_sub_order_by_id(&self, id: i64) -> Option<SubOrder>;
    fn get_sub_order(&self, exchange: &str, exchange_order_id: &str) -> Option<SubOrder>;
    fn get_open_sub_orders(&self) -> Vec<SubOrder>;
    fn get_sub_orders_to_check(&self) -> Vec<SubOrder>;
    fn get_sub_orders_to_resend(&self) -> Vec<SubOrder>;

    fn insert_trade(&self, trade: Trade);
    fn get_sub_order_trades(&self, sub_order_id: i64) -> Vec<Trade>;

    fn insert_withdraw(&self, withdrawal: Withdrawal);
    fn update_withdraw_status(&self, exchange_withdraw_id: &str, status: WithdrawalStatus);
    fn get_withdraws_to_check(&self) -> Vec<Withdrawal>;

    fn insert_transaction(&self, transaction: Transaction);
    fn update_transaction_status(&self, transaction_hash: &str, status: TxStatus);
    fn get_pending_transactions(&self) -> Vec<Transaction>;
}

/// Shorthand used throughout the rest of the workspace; an `Arc`-wrapped
/// concrete store so clones are O(1) pointer copies.
pub type SharedStore = Arc<InMemoryStore>;
