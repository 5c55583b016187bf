//! Per-venue exchange adapter interface. The broker core only ever talks to
//! venues through this trait, never to a specific exchange's SDK directly —
//! the same seam an `OrderPool` trait gives between a pool's internal state
//! machine and whatever is injecting orders.
//!
//! Concrete venues are out of scope for the core: this crate ships one
//! reference implementation, [`RestExchangeAdapter`], built against a
//! generic REST shape so integration tests and the supervisor wiring have
//! something real to construct. A production deployment plugs in one
//! instance of `RestExchangeAdapter` (or another `ExchangeAdapter`
//! implementor) per configured venue.

mod error;
mod rest;

pub use error::{ExchangeError, SubmitError};
pub use rest::{RestAdapterConfig, RestExchangeAdapter};

use async_trait::async_trait;
use broker_types::{Side, SubOrder, Trade, Withdrawal, WithdrawalStatus};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// What a venue hands back for a successfully placed order.
#[derive(Debug, Clone)]
pub struct VenueOrder {
    pub exchange_order_id: String,
}

/// A venue's withdrawal constraints.
#[derive(Debug, Clone, Copy)]
pub struct WithdrawLimit {
    pub min: Decimal,
    pub fee: Decimal,
}

/// Outcome of polling one outstanding withdrawal; only non-pending results
/// are ever returned from `check_withdraws`.
#[derive(Debug, Clone)]
pub struct WithdrawCheck {
    pub exchange_withdraw_id: String,
    pub status: WithdrawalStatus,
}

/// One venue connection. Implementors must paper over venue idiosyncrasies
/// themselves: an explicit transfer-before-withdraw step, and downgrading a
/// misleadingly-final "ok" withdrawal status back to `pending` using
/// venue-native fields. The broker core never special-cases a venue by name.
#[async_trait]
#[auto_impl::auto_impl(Arc)]
pub trait ExchangeAdapter: Send + Sync {
    /// Venue identifier this adapter serves, e.g. `"binance"`.
    fn venue(&self) -> &str;

    /// `clientOrderId = id` is passed through so a retried call observes
    /// the same placement rather than double-submitting.
    async fn submit_sub_order(
        &self,
        id: i64,
        symbol: &str,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Result<VenueOrder, SubmitError>;

    /// Advisory only: the authoritative terminal status always arrives
    /// through `check_sub_orders` -> the trade callback.
    async fn cancel_sub_order(&self, sub_order: &SubOrder);

    /// Filtered to currencies the chain recognizes, callers pass the
    /// already-filtered registry in; this adapter does the filtering.
    async fn get_balances(&self) -> Result<HashMap<String, Decimal>, ExchangeError>;

    /// Emits one [`Trade`] on `sink` per sub-order that has reached a
    /// venue-terminal state. Errors are logged by the caller and never
    /// propagate past a single sub-order.
    async fn check_sub_orders(&self, sub_orders: &[SubOrder], sink: &mpsc::Sender<Trade>);

    fn has_withdraw(&self) -> bool;

    async fn get_withdraw_limit(&self, currency: &str) -> Option<WithdrawLimit>;

    /// Errors are swallowed and reported as `None`; the liability
    /// reconciler loop retries on its next tick.
    async fn withdraw(&self, currency: &str, amount: Decimal, address: &str) -> Option<String>;

    async fn check_withdraws(&self, withdraws: &[Withdrawal]) -> Vec<WithdrawCheck>;
}
