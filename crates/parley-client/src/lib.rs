//! Client-side session state machine for a two-party chat backend.
//!
//! [`SessionController`] owns one logged-in session at a time. Each session
//! bundles a [`RosterPoller`], a [`ConversationStore`] and a
//! [`ConnectionManager`]; all three are torn down together on logout or when
//! the identity changes.

pub mod connection;
pub mod conversation;
pub mod events;
pub mod roster;
pub mod session;

pub use connection::{CloseHandler, ConnectionManager, MessageHandler};
pub use conversation::{ConversationStore, HistoryOutcome, PushOutcome};
pub use events::EventSink;
pub use roster::{RosterPoller, RosterStore};
pub use session::{ClientConfig, PresentationHooks, SessionController, SessionSnapshot};
