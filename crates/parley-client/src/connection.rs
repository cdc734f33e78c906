//! The single push channel of a session.
//!
//! At most one connection is open at a time. Opening closes the previous one
//! first, and a connect that finishes after a newer `open` or a `close` is
//! thrown away instead of installed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::api::{PushConnector, PushFrame};
use parley_core::errors::ChannelError;
use parley_core::events::ConnectionState;
use parley_core::ids::{ConnectionId, UserId};
use parley_core::model::{Message, OutboundFrame};

/// Receives every decoded inbound message.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Called once when the remote end drops a connection. Never called for `close()`.
pub type CloseHandler = Arc<dyn Fn(ConnectionId, ChannelError) + Send + Sync>;

struct ActiveConnection {
    id: ConnectionId,
    user_id: UserId,
    outbound: mpsc::Sender<String>,
    live: Arc<AtomicBool>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl ActiveConnection {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Silence the handlers and release the link. Dropping `outbound` closes the socket.
    fn shut(self) {
        self.live.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        self.reader.abort();
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn PushConnector>,
    current: Mutex<Option<ActiveConnection>>,
    generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn PushConnector>) -> Self {
        Self {
            connector,
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Open the push channel for `user_id`, closing any previous one first.
    ///
    /// Returns [`ChannelError::Superseded`] when another `open` or a `close`
    /// happened while this one was connecting.
    pub async fn open(
        &self,
        user_id: UserId,
        on_message: MessageHandler,
        on_close: CloseHandler,
    ) -> Result<ConnectionId, ChannelError> {
        let ticket = self.begin_open();

        let link = match self.connector.connect(user_id).await {
            Ok(link) => link,
            Err(e) => {
                warn!(user_id = %user_id, error_kind = e.error_kind(), error = %e, "push channel connect failed");
                return Err(e);
            }
        };

        let mut current = self.current.lock();
        if self.generation.load(Ordering::SeqCst) != ticket {
            debug!(user_id = %user_id, "push channel connect superseded, discarding");
            return Err(ChannelError::Superseded);
        }

        let id = ConnectionId::new();
        let live = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_loop(
            link.inbound,
            id.clone(),
            Arc::clone(&live),
            cancel.clone(),
            on_message,
            on_close,
        ));
        *current = Some(ActiveConnection {
            id: id.clone(),
            user_id,
            outbound: link.outbound,
            live,
            cancel,
            reader,
        });
        info!(connection_id = %id, user_id = %user_id, "push channel open");
        Ok(id)
    }

    fn begin_open(&self) -> u64 {
        let mut current = self.current.lock();
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = current.take() {
            debug!(connection_id = %previous.id, "closing previous push channel");
            previous.shut();
        }
        ticket
    }

    /// Close the channel. Idempotent; no handler fires afterwards.
    pub fn close(&self) -> bool {
        let mut current = self.current.lock();
        let _ = self.generation.fetch_add(1, Ordering::SeqCst);
        match current.take() {
            Some(connection) => {
                info!(connection_id = %connection.id, user_id = %connection.user_id, "push channel closed");
                connection.shut();
                true
            }
            None => false,
        }
    }

    /// Queue `content` for `receiver`. Returns whether it was handed to the channel.
    ///
    /// Not sending is silent: no peer, no open channel and empty content are
    /// all ordinary states for the composer.
    pub fn send(&self, receiver: Option<UserId>, content: &str) -> bool {
        if content.is_empty() {
            return false;
        }
        let Some(receiver_id) = receiver else {
            debug!("no peer selected, not sending");
            return false;
        };

        let current = self.current.lock();
        let Some(connection) = current.as_ref().filter(|c| c.is_live()) else {
            debug!(receiver_id = %receiver_id, "push channel not open, not sending");
            return false;
        };

        let frame = OutboundFrame {
            receiver_id,
            content: content.to_string(),
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                let e = ChannelError::Encode(e.to_string());
                warn!(error_kind = e.error_kind(), error = %e, "outbound frame not sent");
                return false;
            }
        };
        match connection.outbound.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(connection_id = %connection.id, error = %e, "outbound queue rejected frame");
                false
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.current.lock().as_ref() {
            None => ConnectionState::Closed,
            Some(c) if c.is_live() => ConnectionState::Open,
            Some(_) => ConnectionState::Dropped,
        }
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.current.lock().as_ref().map(|c| c.id.clone())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(connection) = self.current.get_mut().take() {
            connection.shut();
        }
    }
}

async fn read_loop(
    mut inbound: mpsc::Receiver<PushFrame>,
    id: ConnectionId,
    live: Arc<AtomicBool>,
    cancel: CancellationToken,
    on_message: MessageHandler,
    on_close: CloseHandler,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return,
            frame = inbound.recv() => frame,
        };

        let reason = match frame {
            Some(PushFrame::Text(text)) => {
                match serde_json::from_str::<Message>(&text) {
                    Ok(message) if live.load(Ordering::SeqCst) => on_message(message),
                    Ok(_) => return,
                    Err(e) => warn!(connection_id = %id, error = %e, "undecodable push frame skipped"),
                }
                continue;
            }
            Some(PushFrame::Closed(reason)) => reason,
            None => None,
        };

        if live.swap(false, Ordering::SeqCst) {
            let error = reason.map_or(ChannelError::Closed, ChannelError::Protocol);
            warn!(connection_id = %id, error_kind = error.error_kind(), error = %error, "push channel dropped by remote");
            on_close(id, error);
        }
        return;
    }
}
