//! The timeline of the conversation with the selected peer.
//!
//! Every selection installs a fresh [`ConversationScope`]. History results and
//! push deliveries carry the scope they were issued for and are dropped when it
//! no longer matches the installed one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use parley_core::api::ChatApi;
use parley_core::errors::FetchError;
use parley_core::events::{PeerPresence, SessionEvent};
use parley_core::ids::{MessageId, UserId};
use parley_core::model::{ConversationScope, Message, RosterEntry};

use crate::events::EventSink;

/// What happened to a history result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// Timeline replaced. `merged` counts buffered pushes appended after it.
    Applied { len: usize, merged: usize },
    /// The selection changed while the request was in flight.
    Stale,
    /// Fetch failed; the timeline was left as it was.
    Failed,
}

/// What happened to a pushed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    /// History is still loading; merged once it lands.
    Buffered,
    Duplicate,
    /// Not part of the selected conversation, or nothing is selected.
    Filtered,
    /// Delivered by a handler registered for an earlier selection.
    Stale,
}

#[derive(Default)]
struct ConversationState {
    scope: Option<ConversationScope>,
    peer: Option<RosterEntry>,
    presence: Option<PeerPresence>,
    timeline: Vec<Message>,
    seen: HashSet<MessageId>,
    loading: bool,
    pending: Vec<Message>,
}

impl ConversationState {
    fn contains(&self, message: &Message) -> bool {
        match message.id {
            Some(id) => self.seen.contains(&id) || self.pending.iter().any(|p| p.id == Some(id)),
            None => false,
        }
    }

    fn append(&mut self, message: Message) {
        if let Some(id) = message.id {
            let _ = self.seen.insert(id);
        }
        self.timeline.push(message);
    }
}

pub struct ConversationStore {
    state: RwLock<ConversationState>,
    epoch: AtomicU64,
    events: EventSink,
}

impl ConversationStore {
    pub fn new(events: EventSink) -> Self {
        Self {
            state: RwLock::new(ConversationState::default()),
            epoch: AtomicU64::new(0),
            events,
        }
    }

    /// Install `peer` as the conversation partner and clear the timeline.
    ///
    /// The returned scope must accompany the history fetch and the push handler
    /// for this selection. Pushes are buffered until the history is applied.
    pub fn select_peer(&self, self_id: UserId, peer: RosterEntry, presence: PeerPresence) -> ConversationScope {
        let scope = ConversationScope {
            self_id,
            peer_id: peer.id,
            epoch: self.epoch.fetch_add(1, Ordering::SeqCst) + 1,
        };
        *self.state.write() = ConversationState {
            scope: Some(scope),
            peer: Some(peer.clone()),
            presence: Some(presence),
            loading: true,
            ..ConversationState::default()
        };
        info!(self_id = %self_id, peer_id = %peer.id, epoch = scope.epoch, "peer selected");
        self.events.emit(SessionEvent::PeerSelected { peer });
        self.events.emit(SessionEvent::TimelineReplaced { len: 0 });
        scope
    }

    /// Fetch the history for `scope` and apply it if the selection still matches.
    pub async fn fetch_history(&self, api: &dyn ChatApi, scope: ConversationScope) -> HistoryOutcome {
        let result = api.messages_between(scope.self_id, scope.peer_id).await;
        self.apply_history(scope, result)
    }

    pub fn apply_history(
        &self,
        scope: ConversationScope,
        result: Result<Vec<Message>, FetchError>,
    ) -> HistoryOutcome {
        let mut state = self.state.write();
        if state.scope != Some(scope) {
            debug!(peer_id = %scope.peer_id, epoch = scope.epoch, "discarding history for a previous selection");
            return HistoryOutcome::Stale;
        }
        state.loading = false;
        let pending = std::mem::take(&mut state.pending);

        match result {
            Ok(history) => {
                state.timeline.clear();
                state.seen.clear();
                for message in history {
                    if scope.includes(&message) {
                        state.append(message);
                    } else {
                        debug!(
                            sender_id = %message.sender_id,
                            receiver_id = %message.receiver_id,
                            "history row outside the selected conversation dropped"
                        );
                    }
                }
                let len = state.timeline.len();
                let mut merged = 0;
                for message in pending {
                    if !state.contains(&message) {
                        state.append(message);
                        merged += 1;
                    }
                }
                let total = state.timeline.len();
                drop(state);

                debug!(peer_id = %scope.peer_id, epoch = scope.epoch, len, merged, "history applied");
                self.events.emit(SessionEvent::TimelineReplaced { len: total });
                HistoryOutcome::Applied { len, merged }
            }
            Err(e) => {
                let mut flushed = Vec::with_capacity(pending.len());
                for message in pending {
                    if !state.contains(&message) {
                        state.append(message.clone());
                        flushed.push(message);
                    }
                }
                drop(state);

                warn!(
                    peer_id = %scope.peer_id,
                    error_kind = e.error_kind(),
                    error = %e,
                    "history fetch failed, keeping timeline"
                );
                for message in flushed {
                    self.events.emit(SessionEvent::MessageAppended { message });
                }
                HistoryOutcome::Failed
            }
        }
    }

    /// Deliver a pushed message from a handler registered under `bound`.
    pub fn on_push(&self, bound: Option<ConversationScope>, message: Message) -> PushOutcome {
        let mut state = self.state.write();
        let Some(scope) = state.scope else {
            return PushOutcome::Filtered;
        };
        if bound != Some(scope) {
            debug!(epoch = scope.epoch, "push from a replaced channel handler ignored");
            return PushOutcome::Stale;
        }
        if !scope.includes(&message) {
            debug!(
                sender_id = %message.sender_id,
                receiver_id = %message.receiver_id,
                "push outside the selected conversation dropped"
            );
            return PushOutcome::Filtered;
        }
        if state.contains(&message) {
            debug!(message_id = ?message.id, "duplicate push dropped");
            return PushOutcome::Duplicate;
        }
        if state.loading {
            state.pending.push(message);
            return PushOutcome::Buffered;
        }
        state.append(message.clone());
        drop(state);

        self.events.emit(SessionEvent::MessageAppended { message });
        PushOutcome::Appended
    }

    /// Forget the selection. Returns whether a peer was selected.
    pub fn clear(&self) -> bool {
        let _ = self.epoch.fetch_add(1, Ordering::SeqCst);
        let previous = std::mem::take(&mut *self.state.write());
        match previous.peer {
            Some(peer) => {
                info!(peer_id = %peer.id, "peer cleared");
                self.events.emit(SessionEvent::PeerCleared);
                true
            }
            None => false,
        }
    }

    /// Re-derive the selected peer's presence from a fresh roster snapshot.
    pub fn update_presence(&self, roster: &[RosterEntry]) -> Option<PeerPresence> {
        let mut state = self.state.write();
        let peer_id = state.peer.as_ref()?.id;
        let presence = if roster.iter().any(|e| e.id == peer_id) {
            PeerPresence::Listed
        } else {
            PeerPresence::Unlisted
        };
        if state.presence == Some(presence) {
            return Some(presence);
        }
        state.presence = Some(presence);
        drop(state);

        match presence {
            PeerPresence::Unlisted => warn!(peer_id = %peer_id, "selected peer missing from roster"),
            PeerPresence::Listed => info!(peer_id = %peer_id, "selected peer back in roster"),
        }
        self.events.emit(SessionEvent::PeerPresenceChanged { peer_id, presence });
        Some(presence)
    }

    pub fn scope(&self) -> Option<ConversationScope> {
        self.state.read().scope
    }

    pub fn peer(&self) -> Option<RosterEntry> {
        self.state.read().peer.clone()
    }

    pub fn presence(&self) -> Option<PeerPresence> {
        self.state.read().presence
    }

    pub fn timeline(&self) -> Vec<Message> {
        self.state.read().timeline.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }
}
