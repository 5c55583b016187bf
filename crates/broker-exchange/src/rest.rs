use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use broker_types::{Side, SubOrder, Status, Trade, TokenRegistry, Withdrawal, WithdrawalStatus};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{instrument, warn};

use crate::{ExchangeAdapter, ExchangeError, SubmitError, VenueOrder, WithdrawCheck, WithdrawLimit};

/// Per-venue configuration: everything needed to stand up one
/// `RestExchangeAdapter` without code changes.
#[derive(Debug, Clone)]
pub struct RestAdapterConfig {
    pub venue: String,
    pub base_url: String,
    pub api_key: Option<String>,
    /// Some venues require an explicit account-to-account transfer before a
    /// withdrawal will be accepted.
    pub requires_transfer_before_withdraw: bool,
    /// The address withdrawals should land at on this venue's books; not
    /// used by every venue, kept generic.
    pub withdraw_source_account: Option<String>,
}

/// Reference [`ExchangeAdapter`] built against a generic REST shape. Real
/// venues differ in endpoint paths and payload shapes; this crate's job is
/// the *seam*, not every venue's SDK. A production deployment swaps in one
/// `RestAdapterConfig` (and, where a venue's wire format genuinely
/// diverges, a sibling adapter type) per venue.
pub struct RestExchangeAdapter {
    config: RestAdapterConfig,
    tokens: Arc<TokenRegistry>,
    client: reqwest::Client,
}

impl RestExchangeAdapter {
    pub fn new(config: RestAdapterConfig, tokens: Arc<TokenRegistry>) -> Self {
        Self { config, tokens, client: reqwest::Client::new() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, self.url(path));
        if let Some(key) = &self.config.api_key {
            req = req.header("X-API-Key", key);
        }
        req
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "orderId")]
    order_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderStatusEntry {
    #[serde(rename = "orderId")]
    order_id: String,
    status: String,
    filled: Option<Decimal>,
    price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct WithdrawStatusEntry {
    #[serde(rename = "withdrawId")]
    withdraw_id: String,
    status: String,
    /// Venue-native field used to downgrade a misleadingly-final "ok".
    /// Absent/`false` means "not actually final yet" even if
    /// `status == "ok"`.
    #[serde(default)]
    confirmed: bool,
}

#[async_trait]
impl ExchangeAdapter for RestExchangeAdapter {
    fn venue(&self) -> &str {
        &self.config.venue
    }

    #[instrument(skip(self), fields(venue = %self.config.venue, id))]
    async fn submit_sub_order(
        &self,
        id: i64,
        symbol: &str,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Result<VenueOrder, SubmitError> {
        let body = serde_json::json!({
            "clientOrderId": id,
            "symbol": symbol,
            "side": side,
            "amount": amount.to_string(),
            "price": price.to_string(),
        });

        let resp = self
            .request(reqwest::Method::POST, "/order")
            .json(&body)
            .send()
            .await
            .map_err(|e| SubmitError(e.to_string()))?;

        let parsed: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| SubmitError(format!("malformed submit response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(SubmitError(err));
        }
        let order_id = parsed
            .order_id
            .ok_or_else(|| SubmitError("no orderId and no error in venue response".into()))?;
        Ok(VenueOrder { exchange_order_id: order_id })
    }

    async fn cancel_sub_order(&self, sub_order: &SubOrder) {
        let Some(order_id) = &sub_order.exchange_order_id else { return };
        if let Err(e) = self
            .request(reqwest::Method::POST, "/order/cancel")
            .json(&serde_json::json!({ "orderId": order_id }))
            .send()
            .await
        {
            // Advisory only: the authoritative status still comes from
            // check_sub_orders, so a failed cancel call is just noise.
            warn!(venue = %self.config.venue, error = %e, "cancel_sub_order request failed");
        }
    }

    async fn get_balances(&self) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let resp = self.request(reqwest::Method::GET, "/balances").send().await?;
        let raw = resp.json::<HashMap<String, Decimal>>().await?;
        Ok(raw
            .into_iter()
            .filter(|(currency, _)| currency.eq_ignore_ascii_case("ETH") || self.tokens.get(currency).is_some())
            .collect())
    }

    async fn check_sub_orders(&self, sub_orders: &[SubOrder], sink: &mpsc::Sender<Trade>) {
        if sub_orders.is_empty() {
            return;
        }
        let ids: Vec<&str> = sub_orders
            .iter()
            .filter_map(|s| s.exchange_order_id.as_deref())
            .collect();
        let resp = match self
            .request(reqwest::Method::GET, "/order/status")
            .query(&[("ids", ids.join(","))])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(venue = %self.config.venue, error = %e, "check_sub_orders request failed");
                return;
            }
        };
        let entries: Vec<OrderStatusEntry> = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(venue = %self.config.venue, error = %e, "malformed order-status response");
                return;
            }
        };

        for entry in entries {
            let Some(sub_order) = sub_orders.iter().find(|s| {
                s.exchange_order_id.as_deref() == Some(entry.order_id.as_str())
            }) else {
                continue;
            };
            let status = match entry.status.as_str() {
                "filled" => Status::Filled,
                "canceled" | "cancelled" => Status::Canceled,
                _ => continue, // still open: not our concern here
            };
            // Missing `filled` on a cancel means "treat as 0".
            let amount = entry.filled.unwrap_or(Decimal::ZERO);
            let price = entry.price.unwrap_or(sub_order.price);
            let trade = Trade {
                exchange: self.config.venue.clone(),
                exchange_order_id: entry.order_id,
                price,
                amount,
                status,
            };
            if sink.send(trade).await.is_err() {
                warn!(venue = %self.config.venue, "trade sink closed, dropping remaining events");
                return;
            }
        }
    }

    fn has_withdraw(&self) -> bool {
        true
    }

    async fn get_withdraw_limit(&self, currency: &str) -> Option<WithdrawLimit> {
        #[derive(Deserialize)]
        struct LimitResponse {
            min: Decimal,
            fee: Decimal,
        }
        let resp = self
            .request(reqwest::Method::GET, "/withdraw/limit")
            .query(&[("currency", currency)])
            .send()
            .await
            .ok()?;
        let parsed: LimitResponse = resp.json().await.ok()?;
        Some(WithdrawLimit { min: parsed.min, fee: parsed.fee })
    }

    async fn withdraw(&self, currency: &str, amount: Decimal, address: &str) -> Option<String> {
        if self.config.requires_transfer_before_withdraw {
            // Move funds from the trading account to the funding account
            // first; a failure here aborts the withdrawal and is swallowed
            // just like a failed withdraw call itself.
            let transfer = self
                .request(reqwest::Method::POST, "/transfer")
                .json(&serde_json::json!({ "currency": currency, "amount": amount.to_string() }))
                .send()
                .await;
            if let Err(e) = transfer {
                warn!(venue = %self.config.venue, error = %e, "pre-withdraw transfer failed");
                return None;
            }
        }

        #[derive(Deserialize)]
        struct WithdrawResponse {
            #[serde(rename = "withdrawId")]
            withdraw_id: Option<String>,
        }

        let resp = self
            .request(reqwest::Method::POST, "/withdraw")
            .json(&serde_json::json!({
                "currency": currency,
                "amount": amount.to_string(),
                "address": address,
            }))
            .send()
            .await
            .ok()?;
        let parsed: WithdrawResponse = resp.json().await.ok()?;
        parsed.withdraw_id
    }

    async fn check_withdraws(&self, withdraws: &[Withdrawal]) -> Vec<WithdrawCheck> {
        if withdraws.is_empty() {
            return Vec::new();
        }
        let ids: Vec<&str> =
            withdraws.iter().map(|w| w.exchange_withdraw_id.as_str()).collect();
        let resp = match self
            .request(reqwest::Method::GET, "/withdraw/status")
            .query(&[("ids", ids.join(","))])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(venue = %self.config.venue, error = %e, "check_withdraws request failed");
                return Vec::new();
            }
        };
        let entries: Vec<WithdrawStatusEntry> = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(venue = %self.config.venue, error = %e, "malformed withdraw-status response");
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter_map(|e| {
                let status = match e.status.as_str() {
                    // "ok" without venue confirmation is still in flight;
                    // downgrade rather than reporting a false terminal state.
                    "ok" if !e.confirmed => return None,
                    "ok" => WithdrawalStatus::Ok,
                    "failed" => WithdrawalStatus::Failed,
                    "canceled" | "cancelled" => WithdrawalStatus::Canceled,
                    _ => return None, // still pending: not returned
                };
                Some(WithdrawCheck { exchange_withdraw_id: e.withdraw_id, status })
            })
            .collect()
    }
}
