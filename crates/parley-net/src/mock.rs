//! In-memory backend doubles for deterministic tests without a server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use parley_core::api::{ChatApi, PushConnector, PushFrame, PushLink};
use parley_core::errors::{AuthError, ChannelError, FetchError};
use parley_core::ids::UserId;
use parley_core::model::{Identity, Message, OutboundFrame, RosterEntry};

/// One pre-programmed reply, optionally delayed.
pub struct MockReply<T, E> {
    result: Result<T, E>,
    delay: Option<Duration>,
}

impl<T, E> MockReply<T, E> {
    pub fn ok(value: T) -> Self {
        Self {
            result: Ok(value),
            delay: None,
        }
    }

    pub fn err(error: E) -> Self {
        Self {
            result: Err(error),
            delay: None,
        }
    }

    /// Wait `delay` before resolving.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn resolve(self) -> Result<T, E> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result
    }
}

/// A recorded call against [`MockChatApi`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiCall {
    CreateUser(String),
    ListUsers,
    MessagesBetween(UserId, UserId),
}

/// Data API double.
///
/// Scripted replies are consumed first, in order. With no script left it behaves
/// like the real backend: logins are idempotent per username, the roster is every
/// user created so far, and history is empty.
#[derive(Default)]
pub struct MockChatApi {
    users: Mutex<Vec<RosterEntry>>,
    next_id: AtomicI64,
    logins: Mutex<VecDeque<MockReply<Identity, AuthError>>>,
    rosters: Mutex<VecDeque<MockReply<Vec<RosterEntry>, FetchError>>>,
    histories: Mutex<HashMap<(UserId, UserId), VecDeque<MockReply<Vec<Message>, FetchError>>>>,
    calls: Mutex<Vec<ApiCall>>,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the user table, as if these users had logged in before.
    pub fn with_users(users: Vec<RosterEntry>) -> Self {
        let max = users.iter().map(|u| u.id.get()).max().unwrap_or(0);
        let api = Self::default();
        *api.users.lock() = users;
        api.next_id.store(max, Ordering::Relaxed);
        api
    }

    pub fn script_login(&self, reply: MockReply<Identity, AuthError>) {
        self.logins.lock().push_back(reply);
    }

    pub fn script_roster(&self, reply: MockReply<Vec<RosterEntry>, FetchError>) {
        self.rosters.lock().push_back(reply);
    }

    pub fn script_history(
        &self,
        self_id: UserId,
        other_id: UserId,
        reply: MockReply<Vec<Message>, FetchError>,
    ) {
        self.histories
            .lock()
            .entry((self_id, other_id))
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().push(call);
    }

    fn login_or_create(&self, username: &str) -> Identity {
        let mut users = self.users.lock();
        if let Some(existing) = users.iter().find(|u| u.username == username) {
            return Identity {
                id: existing.id,
                username: existing.username.clone(),
            };
        }
        let id = UserId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        users.push(RosterEntry::new(id, username));
        Identity {
            id,
            username: username.to_string(),
        }
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn create_user(&self, username: &str) -> Result<Identity, AuthError> {
        self.record(ApiCall::CreateUser(username.to_string()));
        let scripted = self.logins.lock().pop_front();
        match scripted {
            Some(reply) => reply.resolve().await,
            None => Ok(self.login_or_create(username)),
        }
    }

    async fn list_users(&self) -> Result<Vec<RosterEntry>, FetchError> {
        self.record(ApiCall::ListUsers);
        let scripted = self.rosters.lock().pop_front();
        match scripted {
            Some(reply) => reply.resolve().await,
            None => Ok(self.users.lock().clone()),
        }
    }

    async fn messages_between(
        &self,
        self_id: UserId,
        other_id: UserId,
    ) -> Result<Vec<Message>, FetchError> {
        self.record(ApiCall::MessagesBetween(self_id, other_id));
        let scripted = self
            .histories
            .lock()
            .get_mut(&(self_id, other_id))
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(reply) => reply.resolve().await,
            None => Ok(Vec::new()),
        }
    }
}

/// Server side of one mock push connection.
pub struct MockRemote {
    pub user_id: UserId,
    sent: mpsc::Receiver<String>,
    push: mpsc::Sender<PushFrame>,
}

impl MockRemote {
    /// Deliver a message to the client, as the backend would.
    pub async fn push(&self, message: &Message) -> bool {
        let Ok(text) = serde_json::to_string(message) else {
            return false;
        };
        self.push_raw(text).await
    }

    pub async fn push_raw(&self, text: impl Into<String>) -> bool {
        self.push.send(PushFrame::Text(text.into())).await.is_ok()
    }

    /// Simulate the backend dropping the socket.
    pub async fn hang_up(&self, reason: Option<&str>) {
        let _ = self
            .push
            .send(PushFrame::Closed(reason.map(str::to_string)))
            .await;
    }

    /// Next frame the client wrote, decoded.
    pub async fn next_sent(&mut self) -> Option<OutboundFrame> {
        let raw = self.sent.recv().await?;
        serde_json::from_str(&raw).ok()
    }

    pub fn try_next_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    /// True once the client has released its end of the link.
    pub fn is_closed(&self) -> bool {
        self.push.is_closed()
    }
}

/// Push connector double. Every successful `connect` yields a [`MockRemote`]
/// retrievable through [`MockConnector::next_remote`].
pub struct MockConnector {
    remotes_tx: mpsc::UnboundedSender<MockRemote>,
    remotes_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockRemote>>,
    failures: Mutex<VecDeque<ChannelError>>,
    connects: AtomicUsize,
}

impl Default for MockConnector {
    fn default() -> Self {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        Self {
            remotes_tx,
            remotes_rx: tokio::sync::Mutex::new(remotes_rx),
            failures: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
        }
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `connect` fail with `error`.
    pub fn fail_next(&self, error: ChannelError) {
        self.failures.lock().push_back(error);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Wait for the next connection the client opens.
    pub async fn next_remote(&self) -> Option<MockRemote> {
        self.remotes_rx.lock().await.recv().await
    }

    /// Every connection opened so far and not yet taken.
    pub async fn drain_remotes(&self) -> Vec<MockRemote> {
        let mut rx = self.remotes_rx.lock().await;
        let mut out = Vec::new();
        while let Ok(remote) = rx.try_recv() {
            out.push(remote);
        }
        out
    }
}

#[async_trait]
impl PushConnector for MockConnector {
    async fn connect(&self, user_id: UserId) -> Result<PushLink, ChannelError> {
        let _ = self.connects.fetch_add(1, Ordering::Relaxed);
        let failure = self.failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let remote = MockRemote {
            user_id,
            sent: outbound_rx,
            push: inbound_tx,
        };
        self.remotes_tx
            .send(remote)
            .map_err(|_| ChannelError::Connect("mock connector dropped".into()))?;

        Ok(PushLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
