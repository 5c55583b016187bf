use std::collections::BTreeMap;

use alloy_primitives::Address;
use async_trait::async_trait;
use broker_types::sub_order::SubOrderStatus;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::{
    error::HubError,
    message::{HubEvent, HubInbound, HubOutbound},
    HubGateway,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = futures_util::stream::SplitSink<WsStream, Message>;

/// Reference hub transport: a single websocket carrying
/// newline-delimited-JSON-tagged [`HubOutbound`]/[`HubInbound`] payloads.
/// Reads run on a background task that forwards parsed [`HubEvent`]s to the
/// supervisor over an `mpsc` channel; writes go straight through a
/// `tokio::sync::Mutex`-guarded sink, since at most one send is ever
/// in-flight at a time from this process.
pub struct WsHubGateway {
    write: tokio::sync::Mutex<WsWrite>,
    tx: mpsc::Sender<HubEvent>,
    last_balances: Mutex<Option<String>>,
}

impl WsHubGateway {
    /// Connects and spawns the read-loop task. The returned receiver is the
    /// supervisor's sole inbound channel: construct the handler set first,
    /// wire it to this gateway, then drain the channel.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<HubEvent>), HubError> {
        let (tx, rx) = mpsc::channel(256);
        let write = Self::dial(url, tx.clone()).await?;
        Ok((Self { write: tokio::sync::Mutex::new(write), tx, last_balances: Mutex::new(None) }, rx))
    }

    /// Reestablishes the socket in place after a `Disconnected` event. The
    /// supervisor's `SubOrderEngine`/`Reconciler` keep holding this same
    /// gateway instance, only the transport underneath is swapped, so the
    /// reconciler loops never need to be told about a reconnect.
    pub async fn reconnect(&self, url: &str) -> Result<(), HubError> {
        let write = Self::dial(url, self.tx.clone()).await?;
        *self.write.lock().await = write;
        Ok(())
    }

    async fn dial(url: &str, tx: mpsc::Sender<HubEvent>) -> Result<WsWrite, HubError> {
        let (stream, _resp) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| HubError::Transport(e.to_string()))?;
        let (write, mut read) = stream.split();

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<HubInbound>(&text) {
                        Ok(inbound) => {
                            if tx.send(HubEvent::Inbound(inbound)).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => tracing::warn!(%error, "unparseable hub message"),
                    },
                    Ok(Message::Close(_)) => {
                        let _ = tx.send(HubEvent::Disconnected).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(%error, "hub transport error");
                        let _ = tx.send(HubEvent::Disconnected).await;
                        break;
                    }
                }
            }
        });

        Ok(write)
    }

    async fn send(&self, outbound: &HubOutbound) -> Result<(), HubError> {
        let payload = serde_json::to_string(outbound).map_err(|e| HubError::Protocol(e.to_string()))?;
        self.write
            .lock()
            .await
            .send(Message::Text(payload))
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }
}

#[async_trait]
impl HubGateway for WsHubGateway {
    async fn connect(&self, address: Address, time: i64, signature: String) -> Result<(), HubError> {
        self.send(&HubOutbound::Connect { address, time, signature }).await
    }

    async fn send_sub_order_status(&self, status: SubOrderStatus) -> Result<(), HubError> {
        self.send(&HubOutbound::SubOrderStatus(status)).await
    }

    async fn send_balances(
        &self,
        balances: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<(), HubError> {
        let payload = serde_json::to_string(&balances).map_err(|e| HubError::Protocol(e.to_string()))?;
        self.send(&HubOutbound::Balances { balances }).await?;
        *self.last_balances.lock() = Some(payload);
        Ok(())
    }

    async fn register(&self, metadata: serde_json::Value) -> Result<(), HubError> {
        self.send(&HubOutbound::Register { metadata }).await
    }

    async fn reconnect(&self, url: &str) -> Result<(), HubError> {
        WsHubGateway::reconnect(self, url).await
    }

    fn get_last_balances_json(&self) -> Option<String> {
        self.last_balances.lock().clone()
    }
}
