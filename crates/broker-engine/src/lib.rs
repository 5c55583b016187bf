//! Sub-order Engine: the status machine. Every operation that touches a
//! given sub-order id runs behind a per-id lock so the machine is
//! race-free without a single global lock serializing unrelated ids.

mod error;

pub use error::EngineError;

use std::{collections::HashMap, sync::Arc};

use broker_chain::ChainClient;
use broker_exchange::ExchangeAdapter;
use broker_hub::HubGateway;
use broker_store::StoreHandle;
use broker_types::{
    sub_order::{CreateSubOrder, Status, SubOrderStatus},
    Exchange, SubOrder, Trade,
};
use parking_lot::Mutex as SyncMutex;
use rust_decimal::Decimal;
use tokio::sync::Mutex as AsyncMutex;

/// Per-`id` keyed lock registry: the outer `parking_lot::Mutex` is held only
/// long enough to fetch-or-insert the `Arc`, then the inner
/// `tokio::sync::Mutex` is awaited across the handler's I/O.
pub struct SubOrderEngine<S: StoreHandle, H: HubGateway> {
    store: S,
    exchanges: HashMap<Exchange, Arc<dyn ExchangeAdapter>>,
    chain: Arc<ChainClient>,
    hub: H,
    locks: SyncMutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl<S: StoreHandle, H: HubGateway> SubOrderEngine<S, H> {
    pub fn new(
        store: S,
        exchanges: HashMap<Exchange, Arc<dyn ExchangeAdapter>>,
        chain: Arc<ChainClient>,
        hub: H,
    ) -> Self {
        Self { store, exchanges, chain, hub, locks: SyncMutex::new(HashMap::new()) }
    }

    fn lock_for(&self, id: i64) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Idempotent replay: a second `onCreateSubOrder` for an
    /// already-persisted id is answered exactly like `onCheckSubOrder`,
    /// without touching the adapter again.
    pub async fn on_create_sub_order(&self, req: CreateSubOrder) -> SubOrderStatus {
        let id = req.id;
        let key_lock = self.lock_for(id);
        let _guard = key_lock.lock().await;

        if self.store.get_sub_order_by_id(id).is_some() {
            return self.status_for_id(id).await;
        }

        let now = now_ms();
        let mut sub_order = SubOrder::new(req, now);
        self.store.insert_sub_order(sub_order.clone());

        let Some(adapter) = self.exchanges.get(&sub_order.exchange).cloned() else {
            tracing::warn!(id, exchange = %sub_order.exchange, "no adapter configured for this venue");
            sub_order.status = Status::Rejected;
            self.store.update_sub_order(sub_order.clone());
            return self.status_for(&sub_order).await;
        };

        match adapter
            .submit_sub_order(id, &sub_order.symbol, sub_order.side, sub_order.amount, sub_order.price)
            .await
        {
            Ok(venue_order) => {
                sub_order.exchange_order_id = Some(venue_order.exchange_order_id);
                sub_order.status = Status::Accepted;
                self.store.update_sub_order(sub_order.clone());
                if sub_order.cancel_requested {
                    adapter.cancel_sub_order(&sub_order).await;
                }
            }
            Err(error) => {
                tracing::warn!(id, %error, "submit rejected by venue");
                sub_order.status = Status::Rejected;
                self.store.update_sub_order(sub_order.clone());
            }
        }

        self.status_for(&sub_order).await
    }

    /// PREPARE cancellation resolved per Design Notes option (b): a
    /// cancel-intent flag honored by `onCreateSubOrder`'s post-submit
    /// continuation, rather than blocking this handler until submit
    /// resolves.
    pub async fn on_cancel_sub_order(&self, id: i64) -> Result<Option<SubOrderStatus>, EngineError> {
        let key_lock = self.lock_for(id);
        let _guard = key_lock.lock().await;

        let Some(mut sub_order) = self.store.get_sub_order_by_id(id) else {
            return Err(EngineError::NotFound(id));
        };

        match sub_order.status {
            Status::Prepare => {
                sub_order.cancel_requested = true;
                self.store.update_sub_order(sub_order);
                Ok(None)
            }
            Status::Accepted => {
                if let Some(adapter) = self.exchanges.get(&sub_order.exchange) {
                    adapter.cancel_sub_order(&sub_order).await;
                }
                // Authoritative terminal status arrives via `checkSubOrders`
                // -> `onTrade`; this handler never mutates status itself.
                Ok(None)
            }
            _ => Ok(Some(self.status_for(&sub_order).await)),
        }
    }

    pub async fn on_check_sub_order(&self, id: i64) -> SubOrderStatus {
        let key_lock = self.lock_for(id);
        let _guard = key_lock.lock().await;
        self.status_for_id(id).await
    }

    /// Applied in order: a hub-reported REJECTED always wins over a
    /// non-terminal local status (but never regresses a FILLED or
    /// CANCELED); otherwise, an acknowledged status matching a terminal
    /// local status stops the resend loop.
    pub async fn on_sub_order_status_accepted(&self, id: i64, status: Status) {
        let key_lock = self.lock_for(id);
        let _guard = key_lock.lock().await;

        let Some(mut sub_order) = self.store.get_sub_order_by_id(id) else {
            return;
        };

        let regresses_terminal = matches!(sub_order.status, Status::Filled | Status::Canceled);
        if status == Status::Rejected && sub_order.status != Status::Rejected && !regresses_terminal {
            sub_order.status = Status::Rejected;
            sub_order.sent_to_aggregator = true;
            self.store.update_sub_order(sub_order);
            return;
        }

        let reported = reported_status(sub_order.status);
        if status == reported && sub_order.status.is_terminal() {
            sub_order.sent_to_aggregator = true;
            self.store.update_sub_order(sub_order);
        }
    }

    /// Callback invoked by an exchange adapter's `check_sub_orders` once a
    /// sub-order has reached a venue-terminal state. Unlike the
    /// hub-originated handlers above, nothing is waiting synchronously
    /// on the return value, so this handler pushes the resulting status to
    /// the hub itself.
    pub async fn on_trade(&self, trade: Trade) {
        let Some(located) = self.store.get_sub_order(&trade.exchange, &trade.exchange_order_id) else {
            tracing::warn!(
                exchange = %trade.exchange,
                exchange_order_id = %trade.exchange_order_id,
                "trade for an unindexed sub-order"
            );
            return;
        };

        let key_lock = self.lock_for(located.id);
        let _guard = key_lock.lock().await;

        let Some(mut sub_order) = self.store.get_sub_order_by_id(located.id) else {
            return;
        };

        if !matches!(trade.status, Status::Filled | Status::Canceled) {
            tracing::warn!(id = sub_order.id, status = %trade.status, "onTrade: non-terminal trade status");
            return;
        }
        if !self.store.get_sub_order_trades(sub_order.id).is_empty() {
            tracing::warn!(id = sub_order.id, "onTrade: sub-order already has a trade, ignoring");
            return;
        }
        if trade.status == Status::Filled && trade.amount != sub_order.amount {
            tracing::warn!(id = sub_order.id, "onTrade: partial fill observed, ignoring");
            return;
        }

        let filled_amount = if trade.status == Status::Filled { trade.amount } else { Decimal::ZERO };
        sub_order.filled_amount = filled_amount;
        sub_order.status = trade.status;

        if filled_amount > Decimal::ZERO {
            self.store.insert_trade(trade);
        }
        self.store.update_sub_order(sub_order.clone());

        let status = self.status_for(&sub_order).await;
        if let Err(error) = self.hub.send_sub_order_status(status).await {
            tracing::warn!(id = sub_order.id, %error, "failed to push terminal status to hub");
        }
    }

    async fn status_for_id(&self, id: i64) -> SubOrderStatus {
        match self.store.get_sub_order_by_id(id) {
            Some(sub_order) => self.status_for(&sub_order).await,
            None => SubOrderStatus { id, status: None, filled_amount: Decimal::ZERO, blockchain_order: None },
        }
    }

    /// Signing is on demand and idempotent: a `blockchain_order` is
    /// recomputed from `(sub_order, trade)` every time rather than cached,
    /// so there is nothing to invalidate across restarts.
    async fn status_for(&self, sub_order: &SubOrder) -> SubOrderStatus {
        let trade = self.store.get_sub_order_trades(sub_order.id).into_iter().next();
        let blockchain_order = match &trade {
            Some(trade) => match self.chain.sign_trade(sub_order, trade).await {
                Ok(order) => Some(order),
                Err(error) => {
                    tracing::warn!(id = sub_order.id, %error, "signTrade failed");
                    None
                }
            },
            None => None,
        };
        SubOrderStatus {
            id: sub_order.id,
            status: Some(reported_status(sub_order.status)),
            filled_amount: sub_order.filled_amount,
            blockchain_order,
        }
    }
}

/// PREPARE is reported to the hub as ACCEPTED, the PREPARE sliver is
/// private to the broker.
fn reported_status(status: Status) -> Status {
    if status == Status::Prepare {
        Status::Accepted
    } else {
        status
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        str::FromStr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use alloy_primitives::Address;
    use alloy_signer_local::PrivateKeySigner;
    use async_trait::async_trait;
    use broker_chain::{ChainClient, ChainClientConfig, ChainGateway};
    use broker_exchange::{ExchangeAdapter, SubmitError, VenueOrder, WithdrawCheck, WithdrawLimit};
    use broker_hub::HubError;
    use broker_store::InMemoryStore;
    use broker_types::{token::TokenInfo, CreateSubOrder, Side, TokenRegistry, Withdrawal};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    use super::*;

    enum Outcome {
        Accept(String),
        Reject,
    }

    struct MockAdapter {
        venue: &'static str,
        outcome: Outcome,
        submit_calls: Arc<AtomicUsize>,
        cancel_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExchangeAdapter for MockAdapter {
        fn venue(&self) -> &str {
            self.venue
        }

        async fn submit_sub_order(
            &self,
            _id: i64,
            _symbol: &str,
            _side: Side,
            _amount: Decimal,
            _price: Decimal,
        ) -> Result<VenueOrder, SubmitError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Outcome::Accept(exchange_order_id) => {
                    Ok(VenueOrder { exchange_order_id: exchange_order_id.clone() })
                }
                Outcome::Reject => Err(SubmitError("venue declined the order".into())),
            }
        }

        async fn cancel_sub_order(&self, _sub_order: &SubOrder) {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        }

        async fn get_balances(&self) -> Result<HashMap<String, Decimal>, broker_exchange::ExchangeError> {
            unimplemented!("not exercised by these tests")
        }

        async fn check_sub_orders(&self, _sub_orders: &[SubOrder], _sink: &mpsc::Sender<Trade>) {
            unimplemented!("not exercised by these tests")
        }

        fn has_withdraw(&self) -> bool {
            false
        }

        async fn get_withdraw_limit(&self, _currency: &str) -> Option<WithdrawLimit> {
            None
        }

        async fn withdraw(&self, _currency: &str, _amount: Decimal, _address: &str) -> Option<String> {
            None
        }

        async fn check_withdraws(&self, _withdraws: &[Withdrawal]) -> Vec<WithdrawCheck> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct MockHub {
        last_status: Mutex<Option<SubOrderStatus>>,
    }

    #[async_trait]
    impl HubGateway for MockHub {
        async fn connect(&self, _address: Address, _time: i64, _signature: String) -> Result<(), HubError> {
            Ok(())
        }

        async fn send_sub_order_status(&self, status: SubOrderStatus) -> Result<(), HubError> {
            *self.last_status.lock() = Some(status);
            Ok(())
        }

        async fn send_balances(
            &self,
            _balances: BTreeMap<String, BTreeMap<String, String>>,
        ) -> Result<(), HubError> {
            Ok(())
        }

        async fn register(&self, _metadata: serde_json::Value) -> Result<(), HubError> {
            Ok(())
        }

        async fn reconnect(&self, _url: &str) -> Result<(), HubError> {
            Ok(())
        }

        fn get_last_balances_json(&self) -> Option<String> {
            None
        }
    }

    fn chain_client() -> Arc<ChainClient> {
        let mut tokens = HashMap::new();
        tokens.insert(
            "BTC".to_string(),
            TokenInfo { address: Address::from_str("0x1111111111111111111111111111111111111111").unwrap(), decimals: 8 },
        );
        tokens.insert(
            "USDT".to_string(),
            TokenInfo { address: Address::from_str("0x2222222222222222222222222222222222222222").unwrap(), decimals: 6 },
        );
        let config = ChainClientConfig {
            chain_id: 3,
            contract_address: Address::from_str("0x3333333333333333333333333333333333333333").unwrap(),
            broker_address: Address::from_str("0x4444444444444444444444444444444444444444").unwrap(),
            matcher_address: Address::from_str("0x5555555555555555555555555555555555555555").unwrap(),
            fee_asset: Address::from_str("0x6666666666666666666666666666666666666666").unwrap(),
        };
        let gateway = ChainGateway::new("http://localhost:1", "http://localhost:1");
        let signer = PrivateKeySigner::random();
        Arc::new(ChainClient::new(config, gateway, signer, Arc::new(TokenRegistry::new(tokens))))
    }

    fn engine(
        adapter: Arc<dyn ExchangeAdapter>,
        hub: Arc<MockHub>,
    ) -> SubOrderEngine<Arc<InMemoryStore>, Arc<MockHub>> {
        let mut exchanges: HashMap<Exchange, Arc<dyn ExchangeAdapter>> = HashMap::new();
        exchanges.insert("x".to_string(), adapter);
        SubOrderEngine::new(InMemoryStore::new(), exchanges, chain_client(), hub)
    }

    fn create_req(id: i64) -> CreateSubOrder {
        CreateSubOrder {
            id,
            symbol: "BTC-USDT".into(),
            side: Side::Buy,
            price: dec!(10000),
            amount: dec!(0.01),
            exchange: "x".into(),
        }
    }

    #[tokio::test]
    async fn s1_happy_path_reaches_filled_with_signed_order() {
        let submit_calls = Arc::new(AtomicUsize::new(0));
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(MockAdapter {
            venue: "x",
            outcome: Outcome::Accept("e1".into()),
            submit_calls: submit_calls.clone(),
            cancel_calls: Arc::new(AtomicUsize::new(0)),
        });
        let hub = Arc::new(MockHub::default());
        let engine = engine(adapter, hub);

        let status = engine.on_create_sub_order(create_req(1)).await;
        assert_eq!(status.status, Some(Status::Accepted));

        engine
            .on_trade(Trade {
                exchange: "x".into(),
                exchange_order_id: "e1".into(),
                price: dec!(10000),
                amount: dec!(0.01),
                status: Status::Filled,
            })
            .await;

        let status = engine.on_check_sub_order(1).await;
        assert_eq!(status.status, Some(Status::Filled));
        let order = status.blockchain_order.expect("filled sub-order must carry a signed order");
        assert_eq!(order.amount, 1_000_000);
        assert_eq!(order.price, 1_000_000_000_000);
        assert_eq!(order.buy_side, 1);
        assert_eq!(order.matcher_fee, 0);
        assert!(!order.signature.is_empty());
    }

    #[tokio::test]
    async fn s2_submit_rejection_reports_rejected_with_no_order() {
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(MockAdapter {
            venue: "x",
            outcome: Outcome::Reject,
            submit_calls: Arc::new(AtomicUsize::new(0)),
            cancel_calls: Arc::new(AtomicUsize::new(0)),
        });
        let engine = engine(adapter, Arc::new(MockHub::default()));

        engine.on_create_sub_order(create_req(2)).await;
        let status = engine.on_check_sub_order(2).await;
        assert_eq!(status.status, Some(Status::Rejected));
        assert!(status.blockchain_order.is_none());
    }

    #[tokio::test]
    async fn s3_hub_override_forces_rejected_and_stops_resend() {
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(MockAdapter {
            venue: "x",
            outcome: Outcome::Accept("e3".into()),
            submit_calls: Arc::new(AtomicUsize::new(0)),
            cancel_calls: Arc::new(AtomicUsize::new(0)),
        });
        let engine = engine(adapter, Arc::new(MockHub::default()));

        engine.on_create_sub_order(create_req(3)).await;
        engine.on_sub_order_status_accepted(3, Status::Rejected).await;

        let status = engine.on_check_sub_order(3).await;
        assert_eq!(status.status, Some(Status::Rejected));
    }

    #[tokio::test]
    async fn s4_idempotent_replay_invokes_adapter_once() {
        let submit_calls = Arc::new(AtomicUsize::new(0));
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(MockAdapter {
            venue: "x",
            outcome: Outcome::Accept("e4".into()),
            submit_calls: submit_calls.clone(),
            cancel_calls: Arc::new(AtomicUsize::new(0)),
        });
        let engine = engine(adapter, Arc::new(MockHub::default()));

        let first = engine.on_create_sub_order(create_req(4)).await;
        let second = engine.on_create_sub_order(create_req(4)).await;

        assert_eq!(submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.status, second.status);
        assert_eq!(first.filled_amount, second.filled_amount);
    }

    #[tokio::test]
    async fn resend_loop_terminates_after_matching_acknowledgement() {
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(MockAdapter {
            venue: "x",
            outcome: Outcome::Accept("e5".into()),
            submit_calls: Arc::new(AtomicUsize::new(0)),
            cancel_calls: Arc::new(AtomicUsize::new(0)),
        });
        let store = InMemoryStore::new();
        let mut exchanges: HashMap<Exchange, Arc<dyn ExchangeAdapter>> = HashMap::new();
        exchanges.insert("x".to_string(), adapter);
        let engine = SubOrderEngine::new(store.clone(), exchanges, chain_client(), Arc::new(MockHub::default()));

        engine.on_create_sub_order(create_req(5)).await;
        engine
            .on_trade(Trade {
                exchange: "x".into(),
                exchange_order_id: "e5".into(),
                price: dec!(10000),
                amount: dec!(0.01),
                status: Status::Canceled,
            })
            .await;

        assert_eq!(store.get_sub_orders_to_resend().len(), 1);
        engine.on_sub_order_status_accepted(5, Status::Canceled).await;
        assert!(store.get_sub_orders_to_resend().is_empty());
    }

    #[tokio::test]
    async fn on_trade_rejects_a_second_trade_for_the_same_sub_order() {
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(MockAdapter {
            venue: "x",
            outcome: Outcome::Accept("e6".into()),
            submit_calls: Arc::new(AtomicUsize::new(0)),
            cancel_calls: Arc::new(AtomicUsize::new(0)),
        });
        let store = InMemoryStore::new();
        let mut exchanges: HashMap<Exchange, Arc<dyn ExchangeAdapter>> = HashMap::new();
        exchanges.insert("x".to_string(), adapter);
        let engine = SubOrderEngine::new(store.clone(), exchanges, chain_client(), Arc::new(MockHub::default()));

        engine.on_create_sub_order(create_req(6)).await;
        let trade = Trade {
            exchange: "x".into(),
            exchange_order_id: "e6".into(),
            price: dec!(10000),
            amount: dec!(0.01),
            status: Status::Filled,
        };
        engine.on_trade(trade.clone()).await;
        engine.on_trade(trade).await;

        assert_eq!(store.get_sub_order_trades(6).len(), 1);
    }
}
