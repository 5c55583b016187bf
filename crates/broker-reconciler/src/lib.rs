//! Reconciler: five independently scheduled periodic loops driving balance
//! broadcast, sub-order polling/resend, withdrawal polling, on-chain
//! transaction polling, and liability discharge. Each loop guards against
//! overlap with a per-loop `AtomicBool`: never start a new tick while the
//! previous one hasn't resolved, the same discipline a single
//! `transition_future` slot gives a round timer.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use broker_chain::{ChainClient, GatewayTxStatus};
use broker_engine::SubOrderEngine;
use broker_exchange::ExchangeAdapter;
use broker_hub::HubGateway;
use broker_store::StoreHandle;
use broker_types::{Exchange, Liability, SubOrder, TxStatus, Withdrawal, WithdrawalStatus};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const GAS_RESERVE_ETH: Decimal = dec!(0.045);
const TX_STALE_AFTER_MS: i64 = 10 * 60 * 1000;

pub struct Reconciler<S: StoreHandle, H: HubGateway> {
    store: S,
    /// Preserves configuration order: `getExchangeForWithdraw` scans venues
    /// in this order, not hashmap-iteration order.
    exchanges: Vec<(Exchange, Arc<dyn ExchangeAdapter>)>,
    chain: Arc<ChainClient>,
    hub: H,
    engine: Arc<SubOrderEngine<S, H>>,
    last_balances: parking_lot::Mutex<HashMap<Exchange, HashMap<String, Decimal>>>,
    due_period_seconds: i64,
}

impl<S: StoreHandle, H: HubGateway> Reconciler<S, H> {
    pub fn new(
        store: S,
        exchanges: Vec<(Exchange, Arc<dyn ExchangeAdapter>)>,
        chain: Arc<ChainClient>,
        hub: H,
        engine: Arc<SubOrderEngine<S, H>>,
        due_period_seconds: i64,
    ) -> Self {
        Self {
            store,
            exchanges,
            chain,
            hub,
            engine,
            last_balances: parking_lot::Mutex::new(HashMap::new()),
            due_period_seconds,
        }
    }

    fn adapter(&self, exchange: &str) -> Option<&Arc<dyn ExchangeAdapter>> {
        self.exchanges.iter().find(|(name, _)| name == exchange).map(|(_, adapter)| adapter)
    }

    /// Spawns all five loops under one `CancellationToken`; shutdown stops
    /// all of them at their next natural yield point.
    pub fn spawn_loops(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            spawn_loop("balances", Duration::from_secs(10), shutdown.clone(), {
                let r = self.clone();
                move || {
                    let r = r.clone();
                    async move { r.balances_tick().await }
                }
            }),
            spawn_loop("sub-orders", Duration::from_secs(10), shutdown.clone(), {
                let r = self.clone();
                move || {
                    let r = r.clone();
                    async move { r.sub_orders_tick().await }
                }
            }),
            spawn_loop("withdrawals", Duration::from_secs(60), shutdown.clone(), {
                let r = self.clone();
                move || {
                    let r = r.clone();
                    async move { r.withdrawals_tick().await }
                }
            }),
            spawn_loop("transactions", Duration::from_secs(10), shutdown.clone(), {
                let r = self.clone();
                move || {
                    let r = r.clone();
                    async move { r.transactions_tick().await }
                }
            }),
            spawn_loop("liabilities", Duration::from_secs(5 * 60), shutdown, {
                let r = self.clone();
                move || {
                    let r = r.clone();
                    async move { r.liabilities_tick().await }
                }
            }),
        ]
    }

    #[tracing::instrument(skip(self))]
    async fn balances_tick(&self) {
        let mut snapshot: HashMap<Exchange, HashMap<String, Decimal>> = HashMap::new();
        // BTreeMap, not HashMap: this gets serialized and diffed against the
        // last-sent payload below, and HashMap's per-instance random
        // iteration order would make two calls with identical contents
        // serialize differently.
        let mut payload: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (exchange, adapter) in &self.exchanges {
            match adapter.get_balances().await {
                Ok(balances) => {
                    payload.insert(
                        exchange.clone(),
                        balances.iter().map(|(k, v)| (k.clone(), v.to_string())).collect(),
                    );
                    snapshot.insert(exchange.clone(), balances);
                }
                Err(error) => tracing::warn!(exchange, %error, "failed to poll balances"),
            }
        }
        *self.last_balances.lock() = snapshot;

        let payload_json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(error) => {
                tracing::warn!(%error, "failed to serialize balances payload");
                return;
            }
        };
        if self.hub.get_last_balances_json().as_deref() == Some(payload_json.as_str()) {
            return;
        }
        if let Err(error) = self.hub.send_balances(payload).await {
            tracing::warn!(%error, "failed to push balances to hub");
        }
    }

    #[tracing::instrument(skip(self))]
    async fn sub_orders_tick(&self) {
        for sub_order in self.store.get_sub_orders_to_resend() {
            let status = self.engine.on_check_sub_order(sub_order.id).await;
            if let Err(error) = self.hub.send_sub_order_status(status).await {
                tracing::warn!(id = sub_order.id, %error, "failed to resend status to hub");
            }
        }

        let mut grouped: HashMap<Exchange, Vec<SubOrder>> = HashMap::new();
        for sub_order in self.store.get_sub_orders_to_check() {
            grouped.entry(sub_order.exchange.clone()).or_default().push(sub_order);
        }
        for (exchange, adapter) in &self.exchanges {
            let Some(batch) = grouped.get(exchange) else { continue };
            let (tx, mut rx) = tokio::sync::mpsc::channel(batch.len().max(1));
            adapter.check_sub_orders(batch, &tx).await;
            drop(tx);
            while let Some(trade) = rx.recv().await {
                self.engine.on_trade(trade).await;
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn withdrawals_tick(&self) {
        let mut grouped: HashMap<Exchange, Vec<Withdrawal>> = HashMap::new();
        for withdrawal in self.store.get_withdraws_to_check() {
            grouped.entry(withdrawal.exchange.clone()).or_default().push(withdrawal);
        }
        for (exchange, adapter) in &self.exchanges {
            let Some(batch) = grouped.get(exchange) else { continue };
            for result in adapter.check_withdraws(batch).await {
                self.store.update_withdraw_status(&result.exchange_withdraw_id, result.status);
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn transactions_tick(&self) {
        for transaction in self.store.get_pending_transactions() {
            match self.chain.get_transaction_status(&transaction.transaction_hash).await {
                Ok(GatewayTxStatus::Ok) => {
                    self.store.update_transaction_status(&transaction.transaction_hash, TxStatus::Ok)
                }
                Ok(GatewayTxStatus::Fail) => {
                    self.store.update_transaction_status(&transaction.transaction_hash, TxStatus::Fail)
                }
                Ok(GatewayTxStatus::Pending) => {}
                Ok(GatewayTxStatus::None) => {
                    if now_ms() - transaction.create_time > TX_STALE_AFTER_MS {
                        self.store.update_transaction_status(&transaction.transaction_hash, TxStatus::Fail);
                    }
                }
                Err(error) => {
                    tracing::warn!(hash = %transaction.transaction_hash, %error, "failed to poll transaction status")
                }
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn liabilities_tick(&self) {
        match self.chain.get_liabilities().await {
            Ok(liabilities) => {
                for liability in &liabilities {
                    self.manage_liability(liability).await;
                }
            }
            Err(error) => tracing::warn!(%error, "failed to fetch liabilities"),
        }
    }

    /// Never mutates state concurrently with an in-flight deposit or
    /// withdrawal.
    async fn manage_liability(&self, liability: &Liability) {
        if liability.outstanding_amount <= Decimal::ZERO {
            return;
        }
        let age_seconds = (now_ms() - liability.timestamp) / 1000;
        if age_seconds <= self.due_period_seconds {
            return;
        }
        if !self.store.get_pending_transactions().is_empty() || !self.store.get_withdraws_to_check().is_empty() {
            return;
        }

        let wallet_asset = match self.chain.get_wallet_balance(&liability.asset_name).await {
            Ok(balance) => balance,
            Err(error) => {
                tracing::warn!(asset = %liability.asset_name, %error, "failed to read wallet asset balance");
                return;
            }
        };
        let wallet_eth = match self.chain.get_wallet_balance("ETH").await {
            Ok(balance) => balance,
            Err(error) => {
                tracing::warn!(%error, "failed to read wallet ETH balance");
                return;
            }
        };

        let available = if liability.asset_name.eq_ignore_ascii_case("ETH") {
            (wallet_asset - GAS_RESERVE_ETH).max(Decimal::ZERO)
        } else if wallet_eth < GAS_RESERVE_ETH {
            tracing::warn!(asset = %liability.asset_name, "gas reserve unavailable, skipping liability tick");
            return;
        } else {
            wallet_asset
        };

        if available >= liability.outstanding_amount {
            self.deposit(liability.outstanding_amount, &liability.asset_name).await;
            return;
        }

        let remaining = liability.outstanding_amount - available;
        match self.get_exchange_for_withdraw(remaining, &liability.asset_name).await {
            Some((exchange, amount_with_fee)) => {
                let Some(adapter) = self.adapter(&exchange) else { return };
                let address = self.chain.broker_address().to_string();
                match adapter.withdraw(&liability.asset_name, amount_with_fee, &address).await {
                    Some(exchange_withdraw_id) => self.store.insert_withdraw(Withdrawal {
                        exchange_withdraw_id,
                        exchange,
                        currency: liability.asset_name.clone(),
                        amount: amount_with_fee,
                        status: WithdrawalStatus::Pending,
                    }),
                    None => tracing::warn!(exchange, asset = %liability.asset_name, "withdrawal request failed, retrying next tick"),
                }
            }
            None => tracing::warn!(asset = %liability.asset_name, "no venue holds enough balance to cover the liability"),
        }
    }

    /// First venue (in configured order) whose last-known balance exceeds
    /// `max(remaining+fee, min)`.
    async fn get_exchange_for_withdraw(&self, remaining: Decimal, asset: &str) -> Option<(Exchange, Decimal)> {
        let candidates: Vec<(Exchange, Option<Decimal>)> = {
            let last = self.last_balances.lock();
            self.exchanges
                .iter()
                .map(|(exchange, _)| {
                    (exchange.clone(), last.get(exchange).and_then(|balances| balances.get(asset)).copied())
                })
                .collect()
        };

        for (exchange, balance) in candidates {
            let Some(balance) = balance else { continue };
            let Some(adapter) = self.adapter(&exchange) else { continue };
            if !adapter.has_withdraw() {
                continue;
            }
            let Some(limit) = adapter.get_withdraw_limit(asset).await else { continue };
            let amount_with_fee = (remaining + limit.fee).max(limit.min);
            if balance > amount_with_fee {
                return Some((exchange, amount_with_fee));
            }
        }
        None
    }

    async fn deposit(&self, amount: Decimal, asset: &str) {
        let wallet_balance = match self.chain.get_wallet_balance(asset).await {
            Ok(balance) => balance,
            Err(error) => {
                tracing::warn!(asset, %error, "failed to read wallet balance before deposit");
                return;
            }
        };
        if wallet_balance < amount {
            tracing::warn!(asset, "wallet balance insufficient for deposit, skipping");
            return;
        }

        let result = if asset.eq_ignore_ascii_case("ETH") {
            self.chain.deposit_eth(amount).await
        } else {
            match self.chain.get_allowance(asset).await {
                Ok(allowance) if allowance >= amount => self.chain.deposit_erc20(amount, asset).await,
                Ok(_) => {
                    tracing::warn!(asset, "allowance below deposit amount, operator must call approve");
                    return;
                }
                Err(error) => {
                    tracing::warn!(asset, %error, "failed to read allowance");
                    return;
                }
            }
        };

        match result {
            Ok(transaction) => self.store.insert_transaction(transaction),
            Err(error) => tracing::warn!(asset, %error, "deposit transaction failed to broadcast"),
        }
    }
}

/// Wraps one periodic `tick` in a `select!` against `shutdown`, spawning
/// each firing as its own task so a slow tick can't stall cancellation
/// responsiveness, while the per-loop `AtomicBool` guard coalesces ticks
/// that would otherwise overlap: at most one in flight per loop.
fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let in_flight = Arc::new(AtomicBool::new(false));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(loop_name = name, "shutdown requested, exiting");
                    break;
                }
                _ = interval.tick() => {
                    if in_flight.swap(true, Ordering::SeqCst) {
                        tracing::debug!(loop_name = name, "previous tick still in flight, skipping");
                        continue;
                    }
                    let in_flight = in_flight.clone();
                    let fut = tick();
                    tokio::spawn(async move {
                        fut.await;
                        in_flight.store(false, Ordering::SeqCst);
                    });
                }
            }
        }
    })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::Address;
    use alloy_signer_local::PrivateKeySigner;
    use async_trait::async_trait;
    use broker_chain::{ChainClientConfig, ChainGateway};
    use broker_exchange::{ExchangeError, SubmitError, VenueOrder, WithdrawCheck, WithdrawLimit};
    use broker_hub::HubError;
    use broker_store::InMemoryStore;
    use broker_types::{token::TokenInfo, Side, SubOrderStatus, TokenRegistry, Transaction, TxMethod};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    use super::*;

    struct MockAdapter {
        venue: &'static str,
        withdraw_limit: Option<WithdrawLimit>,
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
            unimplemented!("not exercised by these tests")
        }

        async fn cancel_sub_order(&self, _sub_order: &SubOrder) {}

        async fn get_balances(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
            Ok(HashMap::new())
        }

        async fn check_sub_orders(&self, _sub_orders: &[SubOrder], _sink: &mpsc::Sender<broker_types::Trade>) {}

        fn has_withdraw(&self) -> bool {
            self.withdraw_limit.is_some()
        }

        async fn get_withdraw_limit(&self, _currency: &str) -> Option<WithdrawLimit> {
            self.withdraw_limit
        }

        async fn withdraw(&self, _currency: &str, _amount: Decimal, _address: &str) -> Option<String> {
            None
        }

        async fn check_withdraws(&self, _withdraws: &[Withdrawal]) -> Vec<WithdrawCheck> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct MockHub;

    #[async_trait]
    impl HubGateway for MockHub {
        async fn connect(&self, _address: Address, _time: i64, _signature: String) -> Result<(), HubError> {
            Ok(())
        }

        async fn send_sub_order_status(&self, _status: SubOrderStatus) -> Result<(), HubError> {
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
            "USDT".to_string(),
            TokenInfo { address: Address::from_str("0x1111111111111111111111111111111111111111").unwrap(), decimals: 6 },
        );
        let config = ChainClientConfig {
            chain_id: 3,
            contract_address: Address::from_str("0x2222222222222222222222222222222222222222").unwrap(),
            broker_address: Address::from_str("0x3333333333333333333333333333333333333333").unwrap(),
            matcher_address: Address::from_str("0x4444444444444444444444444444444444444444").unwrap(),
            fee_asset: Address::from_str("0x5555555555555555555555555555555555555555").unwrap(),
        };
        let gateway = ChainGateway::new("http://localhost:1", "http://localhost:1");
        Arc::new(ChainClient::new(config, gateway, PrivateKeySigner::random(), Arc::new(TokenRegistry::new(tokens))))
    }

    fn reconciler(
        exchanges: Vec<(Exchange, Arc<dyn ExchangeAdapter>)>,
    ) -> Reconciler<Arc<InMemoryStore>, Arc<MockHub>> {
        let store = InMemoryStore::new();
        let hub = Arc::new(MockHub);
        let chain = chain_client();
        let engine = Arc::new(SubOrderEngine::new(store.clone(), HashMap::new(), chain.clone(), hub.clone()));
        Reconciler::new(store, exchanges, chain, hub, engine, 3_600)
    }

    #[tokio::test]
    async fn venue_selection_picks_first_qualifying_venue_in_order() {
        let r = reconciler(vec![
            ("x".to_string(), Arc::new(MockAdapter { venue: "x", withdraw_limit: Some(WithdrawLimit { min: dec!(10), fee: dec!(1) }) })),
            ("y".to_string(), Arc::new(MockAdapter { venue: "y", withdraw_limit: Some(WithdrawLimit { min: dec!(10), fee: dec!(1) }) })),
        ]);
        {
            let mut last = r.last_balances.lock();
            last.insert("x".to_string(), HashMap::from([("USDT".to_string(), dec!(50))]));
            last.insert("y".to_string(), HashMap::from([("USDT".to_string(), dec!(200))]));
        }

        let picked = r.get_exchange_for_withdraw(dec!(100), "USDT").await;
        assert_eq!(picked, Some(("y".to_string(), dec!(101))));
    }

    #[tokio::test]
    async fn venue_selection_returns_none_when_no_venue_qualifies() {
        let r = reconciler(vec![(
            "x".to_string(),
            Arc::new(MockAdapter { venue: "x", withdraw_limit: Some(WithdrawLimit { min: dec!(10), fee: dec!(1) }) }),
        )]);
        {
            let mut last = r.last_balances.lock();
            last.insert("x".to_string(), HashMap::from([("USDT".to_string(), dec!(5))]));
        }

        assert_eq!(r.get_exchange_for_withdraw(dec!(100), "USDT").await, None);
    }

    #[tokio::test]
    async fn manage_liability_skips_while_a_transaction_is_pending() {
        let r = reconciler(Vec::new());
        r.store.insert_transaction(Transaction {
            transaction_hash: "0xabc".into(),
            method: TxMethod::DepositErc20,
            asset: "USDT".into(),
            amount: dec!(1),
            create_time: now_ms(),
            status: TxStatus::Pending,
        });

        let liability = Liability {
            asset_name: "USDT".into(),
            outstanding_amount: dec!(100),
            timestamp: now_ms() - 10_000_000,
        };
        r.manage_liability(&liability).await;

        // No deposit transaction was inserted beyond the pre-existing one.
        assert_eq!(r.store.get_pending_transactions().len(), 1);
    }

    #[tokio::test]
    async fn manage_liability_skips_when_not_yet_due() {
        let r = reconciler(Vec::new());
        let liability = Liability { asset_name: "USDT".into(), outstanding_amount: dec!(100), timestamp: now_ms() };
        r.manage_liability(&liability).await;
        assert!(r.store.get_pending_transactions().is_empty());
    }
}
