//! Login lifecycle and the live session object.
//!
//! A logged-in session is one [`ActiveSession`]: identity, roster poller,
//! conversation store and push channel. It is created on login and torn down
//! as a whole on logout or when another identity logs in. Push handlers route
//! through the session's conversation store, which checks the live selection
//! at delivery time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use parley_core::api::{ChatApi, PushConnector};
use parley_core::errors::{AuthError, FetchError};
use parley_core::events::{ConnectionState, PeerPresence, SessionEvent, SessionPhase};
use parley_core::model::{ConversationScope, Identity, Message, RosterEntry};

use crate::connection::{CloseHandler, ConnectionManager, MessageHandler};
use crate::conversation::{ConversationStore, HistoryOutcome};
use crate::events::EventSink;
use crate::roster::{RosterListener, RosterPoller};

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Owned copy of everything the UI reads.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub identity: Option<Identity>,
    /// Roster without the logged-in identity.
    pub roster: Vec<RosterEntry>,
    pub peer: Option<RosterEntry>,
    pub peer_presence: Option<PeerPresence>,
    pub timeline: Vec<Message>,
    pub connection: ConnectionState,
}

struct ActiveSession {
    identity: Identity,
    roster: RosterPoller,
    conversation: Arc<ConversationStore>,
    connection: ConnectionManager,
}

impl ActiveSession {
    fn new(
        identity: Identity,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn PushConnector>,
        events: &EventSink,
    ) -> Arc<Self> {
        let conversation = Arc::new(ConversationStore::new(events.clone()));
        let listener: RosterListener = {
            let conversation = Arc::clone(&conversation);
            Arc::new(move |entries| {
                let _ = conversation.update_presence(entries);
            })
        };
        Arc::new(Self {
            identity,
            roster: RosterPoller::new(api, events.clone()).with_listener(listener),
            conversation,
            connection: ConnectionManager::new(connector),
        })
    }

    fn shutdown(&self) {
        let _ = self.roster.stop();
        let _ = self.connection.close();
        let _ = self.conversation.clear();
    }
}

enum Phase {
    LoggedOut,
    LoggingIn { attempt: u64 },
    LoggedIn(Arc<ActiveSession>),
}

pub struct SessionController {
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn PushConnector>,
    config: ClientConfig,
    phase: Mutex<Phase>,
    attempts: AtomicU64,
    events: EventSink,
}

impl SessionController {
    pub fn new(api: Arc<dyn ChatApi>, connector: Arc<dyn PushConnector>, config: ClientConfig) -> Self {
        Self {
            api,
            connector,
            config,
            phase: Mutex::new(Phase::LoggedOut),
            attempts: AtomicU64::new(0),
            events: EventSink::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Log in as `username`, replacing any current session.
    ///
    /// On success the roster poller starts with an immediate fetch and the push
    /// channel opens with no peer selected.
    pub async fn login(&self, username: &str) -> Result<Identity, AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(self.login_failed(AuthError::EmptyUsername));
        }
        let attempt = self.begin_login().map_err(|e| self.login_failed(e))?;

        info!(username, attempt, "logging in");
        let result = self.api.create_user(username).await;

        let outcome = {
            let mut phase = self.phase.lock();
            let still_current = matches!(&*phase, Phase::LoggingIn { attempt: a } if *a == attempt);
            if !still_current {
                Err(AuthError::Cancelled)
            } else {
                match result {
                    Ok(identity) => {
                        let session = ActiveSession::new(
                            identity,
                            Arc::clone(&self.api),
                            Arc::clone(&self.connector),
                            &self.events,
                        );
                        *phase = Phase::LoggedIn(Arc::clone(&session));
                        Ok(session)
                    }
                    Err(e) => {
                        *phase = Phase::LoggedOut;
                        Err(e)
                    }
                }
            }
        };

        let session = match outcome {
            Ok(session) => session,
            Err(AuthError::Cancelled) => {
                debug!(attempt, "login response arrived after logout, discarded");
                return Err(AuthError::Cancelled);
            }
            Err(e) => return Err(self.login_failed(e)),
        };

        let identity = session.identity.clone();
        info!(user_id = %identity.id, username = %identity.username, "logged in");
        self.events.emit(SessionEvent::LoggedIn {
            identity: identity.clone(),
        });
        session.roster.start(self.config.poll_interval);
        let _ = self.open_channel(&session, None).await;
        Ok(identity)
    }

    fn begin_login(&self) -> Result<u64, AuthError> {
        let mut phase = self.phase.lock();
        if matches!(&*phase, Phase::LoggingIn { .. }) {
            return Err(AuthError::InProgress);
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Phase::LoggedIn(previous) = std::mem::replace(&mut *phase, Phase::LoggingIn { attempt }) {
            info!(user_id = %previous.identity.id, "identity change, closing previous session");
            previous.shutdown();
            self.events.emit(SessionEvent::LoggedOut);
        }
        Ok(attempt)
    }

    fn login_failed(&self, e: AuthError) -> AuthError {
        error!(error_kind = e.error_kind(), error = %e, "login failed");
        self.events.emit(SessionEvent::LoginFailed { reason: e.to_string() });
        e
    }

    /// End the session. A login still in flight is abandoned.
    ///
    /// Returns whether there was anything to end.
    pub fn logout(&self) -> bool {
        let previous = std::mem::replace(&mut *self.phase.lock(), Phase::LoggedOut);
        match previous {
            Phase::LoggedIn(session) => {
                session.shutdown();
                info!(user_id = %session.identity.id, "logged out");
                self.events.emit(SessionEvent::LoggedOut);
                true
            }
            Phase::LoggingIn { attempt } => {
                info!(attempt, "login abandoned");
                true
            }
            Phase::LoggedOut => false,
        }
    }

    /// Make `peer` the conversation partner.
    ///
    /// Order: scope installed and timeline cleared, then the channel reopened,
    /// then history fetched. Returns `None` when nothing changed.
    pub async fn select_peer(&self, peer: RosterEntry) -> Option<HistoryOutcome> {
        let Some(session) = self.active() else {
            warn!(peer_id = %peer.id, "peer selection ignored, not logged in");
            return None;
        };
        if peer.id == session.identity.id {
            warn!(peer_id = %peer.id, "cannot select own identity as peer");
            return None;
        }
        if session.conversation.peer().is_some_and(|p| p.id == peer.id) {
            debug!(peer_id = %peer.id, "peer already selected");
            return None;
        }

        let presence = if session.roster.store().contains(peer.id) {
            PeerPresence::Listed
        } else {
            PeerPresence::Unlisted
        };
        let scope = session.conversation.select_peer(session.identity.id, peer, presence);
        // A roster tick may have landed before the peer was installed.
        let _ = session.conversation.update_presence(&session.roster.store().snapshot());
        let _ = self.open_channel(&session, Some(scope)).await;

        if session.conversation.scope() != Some(scope) {
            debug!(epoch = scope.epoch, "selection changed before history fetch, skipping");
            return Some(HistoryOutcome::Stale);
        }
        Some(session.conversation.fetch_history(self.api.as_ref(), scope).await)
    }

    /// Deselect the peer. The channel is reopened with no conversation bound.
    pub async fn clear_peer(&self) -> bool {
        let Some(session) = self.active() else {
            return false;
        };
        if !session.conversation.clear() {
            return false;
        }
        let _ = self.open_channel(&session, None).await;
        true
    }

    /// Send `text` to the selected peer. The timeline only changes when the
    /// backend echoes the message back.
    pub fn send_message(&self, text: &str) -> bool {
        let Some(session) = self.active() else {
            return false;
        };
        let peer = session.conversation.peer().map(|p| p.id);
        session.connection.send(peer, text)
    }

    /// Fetch the roster now, outside the poll timer.
    pub async fn refresh_roster(&self) -> Result<Vec<RosterEntry>, FetchError> {
        match self.active() {
            Some(session) => session.roster.refresh_now().await,
            None => Ok(Vec::new()),
        }
    }

    /// Look `username` up in the visible roster.
    pub fn find_peer(&self, username: &str) -> Option<RosterEntry> {
        let session = self.active()?;
        session
            .roster
            .store()
            .find_by_name(username)
            .filter(|e| e.id != session.identity.id)
    }

    pub fn phase(&self) -> SessionPhase {
        match &*self.phase.lock() {
            Phase::LoggedOut => SessionPhase::LoggedOut,
            Phase::LoggingIn { .. } => SessionPhase::LoggingIn,
            Phase::LoggedIn(_) => SessionPhase::LoggedIn,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let phase = self.phase();
        match self.active() {
            Some(session) => SessionSnapshot {
                phase,
                identity: Some(session.identity.clone()),
                roster: session.roster.store().visible(session.identity.id),
                peer: session.conversation.peer(),
                peer_presence: session.conversation.presence(),
                timeline: session.conversation.timeline(),
                connection: session.connection.state(),
            },
            None => SessionSnapshot {
                phase,
                identity: None,
                roster: Vec::new(),
                peer: None,
                peer_presence: None,
                timeline: Vec::new(),
                connection: ConnectionState::Closed,
            },
        }
    }

    fn active(&self) -> Option<Arc<ActiveSession>> {
        match &*self.phase.lock() {
            Phase::LoggedIn(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// (Re)open the push channel with deliveries bound to `scope`.
    async fn open_channel(&self, session: &Arc<ActiveSession>, scope: Option<ConversationScope>) -> bool {
        let on_message: MessageHandler = {
            let conversation = Arc::clone(&session.conversation);
            Arc::new(move |message| {
                let _ = conversation.on_push(scope, message);
            })
        };
        let on_close: CloseHandler = {
            let events = self.events.clone();
            Arc::new(move |connection_id, error| {
                events.emit(SessionEvent::ConnectionDropped {
                    connection_id,
                    reason: error.to_string(),
                });
            })
        };

        // Failures are logged by the manager; the next selection change retries.
        let Ok(connection_id) = session.connection.open(session.identity.id, on_message, on_close).await else {
            return false;
        };
        self.events.emit(SessionEvent::ConnectionOpened { connection_id });
        true
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Phase::LoggedIn(session) = std::mem::replace(self.phase.get_mut(), Phase::LoggedOut) {
            session.shutdown();
        }
    }
}

/// The surface a presentation layer drives. It holds no state of its own.
#[async_trait]
pub trait PresentationHooks: Send + Sync {
    async fn on_login(&self, username: &str) -> Result<Identity, AuthError>;
    async fn on_select_peer(&self, peer: RosterEntry);
    fn on_send_message(&self, text: &str) -> bool;
    fn snapshot(&self) -> SessionSnapshot;
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

#[async_trait]
impl PresentationHooks for SessionController {
    async fn on_login(&self, username: &str) -> Result<Identity, AuthError> {
        self.login(username).await
    }

    async fn on_select_peer(&self, peer: RosterEntry) {
        let _ = self.select_peer(peer).await;
    }

    fn on_send_message(&self, text: &str) -> bool {
        self.send_message(text)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionController::snapshot(self)
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        SessionController::subscribe(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_net::{ApiCall, MockChatApi, MockConnector, MockReply};

    fn controller(api: &Arc<MockChatApi>, connector: &Arc<MockConnector>) -> SessionController {
        SessionController::new(api.clone(), connector.clone(), ClientConfig::default())
    }

    #[tokio::test]
    async fn blank_username_never_reaches_backend() {
        let api = Arc::new(MockChatApi::new());
        let connector = Arc::new(MockConnector::new());
        let session = controller(&api, &connector);
        let mut events = session.subscribe();

        assert_eq!(session.login("   ").await.unwrap_err(), AuthError::EmptyUsername);
        assert!(api.calls().is_empty());
        assert_eq!(session.phase(), SessionPhase::LoggedOut);
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::LoginFailed { .. }));
    }

    #[tokio::test]
    async fn rejected_login_stays_logged_out() {
        let api = Arc::new(MockChatApi::new());
        api.script_login(MockReply::err(AuthError::Rejected {
            status: 422,
            body: "bad".into(),
        }));
        let connector = Arc::new(MockConnector::new());
        let session = controller(&api, &connector);

        let err = session.login("alice").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected { status: 422, .. }));
        assert_eq!(session.phase(), SessionPhase::LoggedOut);
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_login_is_refused() {
        let api = Arc::new(MockChatApi::new());
        api.script_login(
            MockReply::ok(Identity {
                id: 1.into(),
                username: "alice".into(),
            })
            .after(Duration::from_secs(1)),
        );
        let connector = Arc::new(MockConnector::new());
        let session = controller(&api, &connector);

        let (first, second) = tokio::join!(session.login("alice"), session.login("bob"));
        assert!(first.is_ok());
        assert_eq!(second.unwrap_err(), AuthError::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_discards_late_login() {
        let api = Arc::new(MockChatApi::new());
        api.script_login(
            MockReply::ok(Identity {
                id: 1.into(),
                username: "alice".into(),
            })
            .after(Duration::from_secs(2)),
        );
        let connector = Arc::new(MockConnector::new());
        let session = controller(&api, &connector);

        let (result, ()) = tokio::join!(session.login("alice"), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(session.logout());
        });
        assert_eq!(result.unwrap_err(), AuthError::Cancelled);
        assert_eq!(session.phase(), SessionPhase::LoggedOut);
        assert!(session.snapshot().identity.is_none());
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn select_requires_login_and_rejects_self() {
        let api = Arc::new(MockChatApi::with_users(vec![RosterEntry::new(2, "bob")]));
        let connector = Arc::new(MockConnector::new());
        let session = controller(&api, &connector);

        assert!(session.select_peer(RosterEntry::new(2, "bob")).await.is_none());

        let me = session.login("alice").await.unwrap();
        assert!(session.select_peer(RosterEntry::from(&me)).await.is_none());
        assert_eq!(api.count_calls(|c| matches!(c, ApiCall::MessagesBetween(..))), 0);
    }

    #[tokio::test]
    async fn reselecting_same_peer_is_a_noop() {
        let api = Arc::new(MockChatApi::with_users(vec![RosterEntry::new(2, "bob")]));
        let connector = Arc::new(MockConnector::new());
        let session = controller(&api, &connector);
        let _ = session.login("alice").await.unwrap();

        assert!(session.select_peer(RosterEntry::new(2, "bob")).await.is_some());
        let connects = connector.connect_count();
        assert!(session.select_peer(RosterEntry::new(2, "bob")).await.is_none());
        assert_eq!(connector.connect_count(), connects);
        assert_eq!(api.count_calls(|c| matches!(c, ApiCall::MessagesBetween(..))), 1);
    }

    #[tokio::test]
    async fn selection_reads_presence_from_current_roster() {
        let api = Arc::new(MockChatApi::with_users(vec![RosterEntry::new(2, "bob")]));
        let connector = Arc::new(MockConnector::new());
        let session = controller(&api, &connector);
        let _ = session.login("alice").await.unwrap();
        let _ = session.refresh_roster().await;

        let _ = session.select_peer(RosterEntry::new(3, "carol")).await;
        assert_eq!(session.snapshot().peer_presence, Some(PeerPresence::Unlisted));

        let _ = session.select_peer(RosterEntry::new(2, "bob")).await;
        assert_eq!(session.snapshot().peer_presence, Some(PeerPresence::Listed));
    }

    #[tokio::test]
    async fn logout_tears_everything_down() {
        let api = Arc::new(MockChatApi::with_users(vec![RosterEntry::new(2, "bob")]));
        let connector = Arc::new(MockConnector::new());
        let session = controller(&api, &connector);
        let _ = session.login("alice").await.unwrap();
        let _ = session.select_peer(RosterEntry::new(2, "bob")).await;

        assert!(session.logout());
        assert!(!session.logout());
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::LoggedOut);
        assert!(snapshot.peer.is_none());
        assert!(snapshot.timeline.is_empty());
        assert_eq!(snapshot.connection, ConnectionState::Closed);
        assert!(!session.send_message("anyone?"));
    }

    #[tokio::test]
    async fn hooks_delegate_to_controller() {
        let api = Arc::new(MockChatApi::with_users(vec![RosterEntry::new(2, "bob")]));
        let connector = Arc::new(MockConnector::new());
        let session = controller(&api, &connector);
        let hooks: &dyn PresentationHooks = &session;

        let me = hooks.on_login("alice").await.unwrap();
        hooks.on_select_peer(RosterEntry::new(2, "bob")).await;
        let snapshot = hooks.snapshot();
        assert_eq!(snapshot.identity, Some(me));
        assert_eq!(snapshot.peer.map(|p| p.username), Some("bob".to_string()));
        assert!(!hooks.on_send_message(""));
    }
}
