use serde::Serialize;

use crate::ids::{ConnectionId, UserId};
use crate::model::{Identity, Message, RosterEntry};

/// Whether the selected peer appeared in the last successful roster snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerPresence {
    Listed,
    Unlisted,
}

/// Where the session is in the login lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    LoggedOut,
    LoggingIn,
    LoggedIn,
}

/// Push channel status as seen by the UI.
///
/// `Dropped` means the remote end closed the socket and nothing has reopened it yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Closed,
    Open,
    Dropped,
}

/// State changes published to the presentation layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    LoggedIn { identity: Identity },
    LoginFailed { reason: String },
    LoggedOut,
    RosterUpdated { entries: Vec<RosterEntry> },
    PeerSelected { peer: RosterEntry },
    PeerCleared,
    PeerPresenceChanged { peer_id: UserId, presence: PeerPresence },
    TimelineReplaced { len: usize },
    MessageAppended { message: Message },
    ConnectionOpened { connection_id: ConnectionId },
    ConnectionDropped { connection_id: ConnectionId, reason: String },
}

impl SessionEvent {
    /// Event type name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LoggedIn { .. } => "logged_in",
            Self::LoginFailed { .. } => "login_failed",
            Self::LoggedOut => "logged_out",
            Self::RosterUpdated { .. } => "roster_updated",
            Self::PeerSelected { .. } => "peer_selected",
            Self::PeerCleared => "peer_cleared",
            Self::PeerPresenceChanged { .. } => "peer_presence_changed",
            Self::TimelineReplaced { .. } => "timeline_replaced",
            Self::MessageAppended { .. } => "message_appended",
            Self::ConnectionOpened { .. } => "connection_opened",
            Self::ConnectionDropped { .. } => "connection_dropped",
        }
    }
}
