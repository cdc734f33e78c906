//! Push channel over `tokio-tungstenite`.
//!
//! The socket is owned by a spawned bridge task; callers only see the two mpsc
//! ends of a [`PushLink`].

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use url::Url;

use parley_core::api::{PushConnector, PushFrame, PushLink};
use parley_core::errors::ChannelError;
use parley_core::ids::UserId;

use crate::error::{parse_base, with_segments, NetError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INBOUND_QUEUE: usize = 256;

/// Opens `{ws_url}/{user_id}`.
pub struct WsConnector {
    base: Url,
    outbound_queue: usize,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(ws_url: &str, outbound_queue: usize, connect_timeout: Duration) -> Result<Self, NetError> {
        Ok(Self {
            base: parse_base(ws_url)?,
            outbound_queue: outbound_queue.max(1),
            connect_timeout,
        })
    }

    pub fn url_for(&self, user_id: UserId) -> Url {
        with_segments(&self.base, &[&user_id.to_string()])
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, user_id: UserId) -> Result<PushLink, ChannelError> {
        let url = self.url_for(user_id);
        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ChannelError::Connect(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        debug!(%url, "push channel connected");

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_queue);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        drop(tokio::spawn(bridge_loop(ws, outbound_rx, inbound_tx)));

        Ok(PushLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Shuttle frames between the socket and the link until either side goes away.
async fn bridge_loop(
    ws: WsStream,
    mut outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<PushFrame>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            out = outbound_rx.recv() => {
                let Some(text) = out else {
                    // Link dropped by the owner: close politely.
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                };
                if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                    warn!(error = %e, "push channel write failed");
                    let _ = inbound_tx.send(PushFrame::Closed(Some(e.to_string()))).await;
                    break;
                }
            }
            incoming = ws_rx.next() => {
                let frame = match incoming {
                    Some(Ok(WsMessage::Text(text))) => PushFrame::Text(text.to_string()),
                    Some(Ok(WsMessage::Close(close))) => {
                        let reason = close.map(|c| c.reason.as_str().to_string()).filter(|r| !r.is_empty());
                        let _ = inbound_tx.send(PushFrame::Closed(reason)).await;
                        break;
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue, // tungstenite answers pings
                    Some(Ok(other)) => {
                        trace!(len = other.len(), "ignoring non-text frame");
                        continue;
                    }
                    Some(Err(e)) => {
                        let _ = inbound_tx.send(PushFrame::Closed(Some(e.to_string()))).await;
                        break;
                    }
                    None => {
                        let _ = inbound_tx.send(PushFrame::Closed(None)).await;
                        break;
                    }
                };
                if inbound_tx.send(frame).await.is_err() {
                    // Nobody is listening any more.
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    }
}
