//! Wire shapes for the hub protocol. Split into a message-id tag and a
//! payload enum, mirroring how RLPx message framing separates a leading id
//! byte from its body: here the wire encoding is newline-delimited JSON
//! over a websocket, so the tag rides along as serde's
//! `#[serde(tag = "type")]` instead of a leading `u8`.

use alloy_primitives::Address;
use broker_types::sub_order::{CreateSubOrder, Status, SubOrderStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubMessageId {
    CreateSubOrder,
    CancelSubOrder,
    CheckSubOrder,
    SubOrderStatusAccepted,
}

/// Inbound requests dispatched by the hub transport to `SubOrderEngine`
/// handlers. `on_reconnect` is deliberately not a variant here: it's a
/// transport lifecycle event, not a wire message, and is carried instead
/// by [`HubEvent::Disconnected`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubInbound {
    CreateSubOrder(CreateSubOrder),
    CancelSubOrder { id: i64 },
    CheckSubOrder { id: i64 },
    SubOrderStatusAccepted { id: i64, status: Status },
}

impl HubInbound {
    pub fn message_id(&self) -> HubMessageId {
        match self {
            HubInbound::CreateSubOrder(_) => HubMessageId::CreateSubOrder,
            HubInbound::CancelSubOrder { .. } => HubMessageId::CancelSubOrder,
            HubInbound::CheckSubOrder { .. } => HubMessageId::CheckSubOrder,
            HubInbound::SubOrderStatusAccepted { .. } => HubMessageId::SubOrderStatusAccepted,
        }
    }
}

/// What the transport task hands the supervisor: either a parsed inbound
/// message or a notice that the connection dropped and `on_reconnect`
/// should run once a new transport is established.
#[derive(Debug, Clone)]
pub enum HubEvent {
    Inbound(HubInbound),
    Disconnected,
}

/// Outbound sends. `Register`'s payload is left as a free-form JSON
/// object: "operator metadata" is deployment-specific and unspecified
/// beyond "some metadata".
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubOutbound {
    Connect { address: Address, time: i64, signature: String },
    SubOrderStatus(SubOrderStatus),
    Balances { balances: BTreeMap<String, BTreeMap<String, String>> },
    Register { metadata: serde_json::Value },
}
