use std::{
    collections::HashMap,
    sync::Arc,
};

use broker_types::{SubOrder, Trade, Transaction, TxStatus, Withdrawal, WithdrawalStatus};
use parking_lot::Mutex;

use crate::{Status, StoreHandle};

#[derive(Default)]
struct Inner {
    sub_orders: HashMap<i64, SubOrder>,
    /// secondary index: `(exchange, exchangeOrderId)` -> sub-order id.
    by_exchange_order_id: HashMap<(String, String), i64>,
    /// at most one trade per sub-order.
    trades: HashMap<i64, Trade>,
    withdrawals: HashMap<String, Withdrawal>,
    transactions: HashMap<String, Transaction>,
}

/// The concrete, in-process store. Every sub-collection lives behind its
/// own `Mutex`, so a read of transactions never contends with a write to
/// sub-orders.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl StoreHandle for Arc<InMemoryStore> {
    fn insert_sub_order(&self, sub_order: SubOrder) {
        let mut inner = self.inner.lock();
        if let Some(ref exch_id) = sub_order.exchange_order_id {
            inner
                .by_exchange_order_id
                .insert((sub_order.exchange.clone(), exch_id.clone()), sub_order.id);
        }
        inner.sub_orders.insert(sub_order.id, sub_order);
    }

    fn update_sub_order(&self, sub_order: SubOrder) {
        // Same write path as insert: idempotent upsert keyed on `id`.
        self.insert_sub_order(sub_order);
    }

    fn get_sub_order_by_id(&self, id: i64) -> Option<SubOrder> {
        self.inner.lock().sub_orders.get(&id).cloned()
    }

    fn get_sub_order(&self, exchange: &str, exchange_order_id: &str) -> Option<SubOrder> {
        let inner = self.inner.lock();
        let id = inner
            .by_exchange_order_id
            .get(&(exchange.to_string(), exchange_order_id.to_string()))?;
        inner.sub_orders.get(id).cloned()
    }

    fn get_open_sub_orders(&self) -> Vec<SubOrder> {
        self.inner
            .lock()
            .sub_orders
            .values()
            .filter(|s| matches!(s.status, Status::Prepare | Status::Accepted))
            .cloned()
            .collect()
    }

    fn get_sub_orders_to_check(&self) -> Vec<SubOrder> {
        self.inner
            .lock()
            .sub_orders
            .values()
            .filter(|s| s.status == Status::Accepted && s.exchange_order_id.is_some())
            .cloned()
            .collect()
    }

    fn get_sub_orders_to_resend(&self) -> Vec<SubOrder> {
        self.inner
            .lock()
            .sub_orders
            .values()
            .filter(|s| s.status.is_terminal() && !s.sent_to_aggregator)
            .cloned()
            .collect()
    }

    fn insert_trade(&self, trade: Trade) {
        let mut inner = self.inner.lock();
        let Some(id) = inner
            .by_exchange_order_id
            .get(&(trade.exchange.clone(), trade.exchange_order_id.clone()))
            .copied()
        else {
            tracing::warn!(
                exchange = %trade.exchange,
                exchange_order_id = %trade.exchange_order_id,
                "insert_trade: no sub-order indexed for this (exchange, exchangeOrderId)"
            );
            return;
        };
        inner.trades.insert(id, trade);
    }

    fn get_sub_order_trades(&self, sub_order_id: i64) -> Vec<Trade> {
        self.inner.lock().trades.get(&sub_order_id).cloned().into_iter().collect()
    }

    fn insert_withdraw(&self, withdrawal: Withdrawal) {
        self.inner
            .lock()
            .withdrawals
            .insert(withdrawal.exchange_withdraw_id.clone(), withdrawal);
    }

    fn update_withdraw_status(&self, exchange_withdraw_id: &str, status: WithdrawalStatus) {
        let mut inner = self.inner.lock();
        if let Some(w) = inner.withdrawals.get_mut(exchange_withdraw_id) {
            // Terminal statuses are sticky.
            if !w.status.is_terminal() {
                w.status = status;
            }
        }
    }

    fn get_withdraws_to_check(&self) -> Vec<Withdrawal> {
        self.inner
            .lock()
            .withdrawals
            .values()
            .filter(|w| w.status == WithdrawalStatus::Pending)
            .cloned()
            .collect()
    }

    fn insert_transaction(&self, transaction: Transaction) {
        self.inner
            .lock()
            .transactions
            .insert(transaction.transaction_hash.clone(), transaction);
    }

    fn update_transaction_status(&self, transaction_hash: &str, status: TxStatus) {
        let mut inner = self.inner.lock();
        if let Some(t) = inner.transactions.get_mut(transaction_hash) {
            if !t.status.is_terminal() {
                t.status = status;
            }
        }
    }

    fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.inner
            .lock()
            .transactions
            .values()
            .filter(|t| t.status == TxStatus::Pending)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use broker_types::{sub_order::CreateSubOrder, Side};

    use super::*;

    fn store() -> Arc<InMemoryStore> {
        InMemoryStore::new()
    }

    fn sub_order(id: i64) -> SubOrder {
        SubOrder::new(
            CreateSubOrder {
                id,
                symbol: "BTC-USDT".into(),
                side: Side::Buy,
                price: "10000".parse().unwrap(),
                amount: "0.01".parse().unwrap(),
                exchange: "x".into(),
            },
            1_000,
        )
    }

    #[test]
    fn insert_then_get_by_id() {
        let store = store();
        store.insert_sub_order(sub_order(1));
        let got = store.get_sub_order_by_id(1).unwrap();
        assert_eq!(got.id, 1);
        assert!(store.get_sub_order_by_id(2).is_none());
    }

    #[test]
    fn secondary_index_tracks_exchange_order_id() {
        let store = store();
        let mut order = sub_order(1);
        order.exchange_order_id = Some("e1".into());
        order.status = Status::Accepted;
        store.insert_sub_order(order);

        let got = store.get_sub_order("x", "e1").unwrap();
        assert_eq!(got.id, 1);
        assert_eq!(store.get_sub_orders_to_check().len(), 1);
    }

    #[test]
    fn terminal_withdraw_status_is_sticky() {
        let store = store();
        store.insert_withdraw(Withdrawal {
            exchange_withdraw_id: "w1".into(),
            exchange: "x".into(),
            currency: "USDT".into(),
            amount: "1".parse().unwrap(),
            status: WithdrawalStatus::Ok,
        });
        store.update_withdraw_status("w1", WithdrawalStatus::Failed);
        let w = store.get_withdraws_to_check();
        assert!(w.is_empty(), "ok is terminal and must not flip to failed");
    }

    #[test]
    fn resend_list_excludes_non_terminal() {
        let store = store();
        store.insert_sub_order(sub_order(1));
        assert!(store.get_sub_orders_to_resend().is_empty());

        let mut order = sub_order(2);
        order.status = Status::Filled;
        order.sent_to_aggregator = false;
        store.insert_sub_order(order);
        assert_eq!(store.get_sub_orders_to_resend().len(), 1);
    }
}
