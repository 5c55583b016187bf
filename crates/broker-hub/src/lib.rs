//! Hub Gateway: the broker's sole seam to the central order-aggregator.
//! Transport-agnostic by design, the core only depends on [`HubGateway`];
//! [`ws::WsHubGateway`] is the one concrete transport this workspace
//! ships, a websocket carrying newline-delimited JSON.

mod error;
mod message;
mod ws;

pub use error::HubError;
pub use message::{HubEvent, HubInbound, HubMessageId, HubOutbound};
pub use ws::WsHubGateway;

use alloy_primitives::Address;
use async_trait::async_trait;
use broker_types::sub_order::SubOrderStatus;
use std::collections::BTreeMap;

/// Outbound sends available to `SubOrderEngine`/`Reconciler`. Inbound
/// dispatch is modeled separately as [`HubInbound`], matched by the
/// supervisor and routed to engine handlers, keeping the handler set and
/// the transport as two objects joined only after both exist.
#[async_trait]
#[auto_impl::auto_impl(Arc)]
pub trait HubGateway: Send + Sync {
    /// Authenticates to the hub with a personal-message signature of the
    /// decimal string of `time`.
    async fn connect(&self, address: Address, time: i64, signature: String) -> Result<(), HubError>;

    async fn send_sub_order_status(&self, status: SubOrderStatus) -> Result<(), HubError>;

    async fn send_balances(
        &self,
        balances: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<(), HubError>;

    async fn register(&self, metadata: serde_json::Value) -> Result<(), HubError>;

    /// Reestablishes the transport after a [`HubEvent::Disconnected`]
    /// without disturbing anything else wired to this gateway: resign and
    /// reconnect, reconciler loops keep running throughout.
    async fn reconnect(&self, url: &str) -> Result<(), HubError>;

    /// The last payload successfully handed to `send_balances`, used by the
    /// Balances reconciler loop to suppress duplicate sends. The gateway
    /// itself never skips a send on the caller's behalf, the caller is the
    /// one that compares.
    fn get_last_balances_json(&self) -> Option<String>;
}
