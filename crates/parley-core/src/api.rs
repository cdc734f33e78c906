use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::{AuthError, ChannelError, FetchError};
use crate::ids::UserId;
use crate::model::{Identity, Message, RosterEntry};

/// Request/response side of the backend.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `POST /users/`. Returns the existing record when the username is taken.
    async fn create_user(&self, username: &str) -> Result<Identity, AuthError>;

    /// `GET /users/`. Full roster snapshot in backend order.
    async fn list_users(&self) -> Result<Vec<RosterEntry>, FetchError>;

    /// `GET /messages/{self_id}/{other_id}`. Conversation history, oldest first.
    async fn messages_between(
        &self,
        self_id: UserId,
        other_id: UserId,
    ) -> Result<Vec<Message>, FetchError>;
}

/// Something that arrived on the push channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushFrame {
    Text(String),
    /// The remote end went away. Carries the transport's reason when it gave one.
    Closed(Option<String>),
}

/// Both ends of an open push channel.
///
/// Dropping `outbound` asks the transport to close the socket.
#[derive(Debug)]
pub struct PushLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<PushFrame>,
}

/// Opens the push channel addressed by an identity.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, user_id: UserId) -> Result<PushLink, ChannelError>;
}
