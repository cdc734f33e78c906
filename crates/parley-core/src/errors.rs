/// Login failures. The only failure class surfaced to the user.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("a login is already in progress")]
    InProgress,
    #[error("login was cancelled")]
    Cancelled,
    #[error("login rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("malformed login response: {0}")]
    Decode(String),
}

/// Roster or history fetch failures. Logged; previous state is kept.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("fetch failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Push channel failures. Logged; no automatic recovery.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("channel closed")]
    Closed,
    #[error("connection superseded by a newer open")]
    Superseded,
    #[error("could not encode frame: {0}")]
    Encode(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl AuthError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::EmptyUsername => "empty_username",
            Self::InProgress => "login_in_progress",
            Self::Cancelled => "login_cancelled",
            Self::Rejected { .. } => "login_rejected",
            Self::Unreachable(_) => "backend_unreachable",
            Self::Decode(_) => "login_decode",
        }
    }
}

impl FetchError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "fetch_status",
            Self::Network(_) => "fetch_network",
            Self::Decode(_) => "fetch_decode",
        }
    }
}

impl ChannelError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "channel_connect",
            Self::Closed => "channel_closed",
            Self::Superseded => "channel_superseded",
            Self::Encode(_) => "channel_encode",
            Self::Protocol(_) => "channel_protocol",
        }
    }
}

impl ChatError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.error_kind(),
            Self::Fetch(e) => e.error_kind(),
            Self::Channel(e) => e.error_kind(),
        }
    }

    /// Only login failures reach the user; everything else degrades to stale state.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
