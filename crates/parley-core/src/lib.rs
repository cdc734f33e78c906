pub mod api;
pub mod errors;
pub mod events;
pub mod ids;
pub mod model;

pub use api::{ChatApi, PushConnector, PushFrame, PushLink};
pub use errors::{AuthError, ChannelError, ChatError, FetchError};
pub use events::{ConnectionState, PeerPresence, SessionEvent, SessionPhase};
pub use ids::{ConnectionId, MessageId, UserId};
pub use model::{ConversationScope, Identity, Message, OutboundFrame, RosterEntry};
