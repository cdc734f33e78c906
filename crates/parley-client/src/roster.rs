//! Periodic roster refresh.
//!
//! Every fetch takes a ticket before it is issued. A response is applied only
//! when its ticket is newer than the last applied one, so a slow response can
//! never overwrite a faster, later one. Stopping the poller retires every
//! outstanding ticket.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::api::ChatApi;
use parley_core::errors::FetchError;
use parley_core::events::SessionEvent;
use parley_core::ids::UserId;
use parley_core::model::RosterEntry;

use crate::events::EventSink;

/// Called with every snapshot that gets applied.
pub type RosterListener = Arc<dyn Fn(&[RosterEntry]) + Send + Sync>;

#[derive(Default)]
struct RosterState {
    entries: Vec<RosterEntry>,
    applied: u64,
}

/// The last successfully fetched roster, in backend order with one entry per id.
#[derive(Default)]
pub struct RosterStore {
    state: Mutex<RosterState>,
    issued: AtomicU64,
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<RosterEntry> {
        self.state.lock().entries.clone()
    }

    /// The roster as shown to `self_id`: everyone but themselves.
    pub fn visible(&self, self_id: UserId) -> Vec<RosterEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.id != self_id)
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.state.lock().entries.iter().any(|e| e.id == id)
    }

    pub fn find_by_name(&self, username: &str) -> Option<RosterEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| e.username == username)
            .cloned()
    }

    fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the snapshot wholesale if `ticket` is the newest seen so far.
    fn apply(&self, ticket: u64, entries: Vec<RosterEntry>) -> bool {
        let mut state = self.state.lock();
        if ticket <= state.applied {
            return false;
        }
        state.applied = ticket;
        state.entries = entries;
        true
    }

    /// Reject every response for a fetch issued before now.
    fn retire_outstanding(&self) {
        let issued = self.issued.load(Ordering::SeqCst);
        let mut state = self.state.lock();
        state.applied = state.applied.max(issued);
    }
}

#[derive(Clone)]
struct Refresher {
    api: Arc<dyn ChatApi>,
    store: Arc<RosterStore>,
    events: EventSink,
    listener: Option<RosterListener>,
}

impl Refresher {
    async fn refresh(&self) -> Result<Vec<RosterEntry>, FetchError> {
        let ticket = self.store.issue();
        match self.api.list_users().await {
            Ok(entries) => {
                let entries = unique_by_id(entries);
                if self.store.apply(ticket, entries.clone()) {
                    debug!(ticket, count = entries.len(), "roster updated");
                    if let Some(listener) = &self.listener {
                        listener(&entries);
                    }
                    self.events.emit(SessionEvent::RosterUpdated {
                        entries: entries.clone(),
                    });
                } else {
                    debug!(ticket, "discarding superseded roster response");
                }
                Ok(entries)
            }
            Err(e) => {
                warn!(error_kind = e.error_kind(), error = %e, "roster fetch failed, keeping previous snapshot");
                Err(e)
            }
        }
    }
}

/// Keeps the first entry for each id, in arrival order.
fn unique_by_id(entries: Vec<RosterEntry>) -> Vec<RosterEntry> {
    let mut seen = HashSet::with_capacity(entries.len());
    let before = entries.len();
    let unique: Vec<RosterEntry> = entries.into_iter().filter(|e| seen.insert(e.id)).collect();
    if unique.len() < before {
        warn!(dropped = before - unique.len(), "roster response repeated user ids");
    }
    unique
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollTask {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Keeps a [`RosterStore`] fresh on a fixed interval while started.
pub struct RosterPoller {
    refresher: Refresher,
    task: Mutex<Option<PollTask>>,
}

impl RosterPoller {
    pub fn new(api: Arc<dyn ChatApi>, events: EventSink) -> Self {
        Self {
            refresher: Refresher {
                api,
                store: Arc::new(RosterStore::new()),
                events,
                listener: None,
            },
            task: Mutex::new(None),
        }
    }

    pub fn with_listener(mut self, listener: RosterListener) -> Self {
        self.refresher.listener = Some(listener);
        self
    }

    pub fn store(&self) -> &Arc<RosterStore> {
        &self.refresher.store
    }

    /// Fetch immediately, then every `interval` until [`stop`](Self::stop).
    ///
    /// Starting an already running poller replaces its timer.
    pub fn start(&self, interval: Duration) {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            debug!("restarting roster poller");
            previous.stop();
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(self.refresher.clone(), interval, cancel.clone()));
        *task = Some(PollTask { cancel, handle });
        info!(interval_ms = interval.as_millis() as u64, "roster poller started");
    }

    /// One fetch outside the timer. Applied under the same ordering rules.
    pub async fn refresh_now(&self) -> Result<Vec<RosterEntry>, FetchError> {
        self.refresher.refresh().await
    }

    /// Cancel the timer. Idempotent. Returns whether a timer was running.
    pub fn stop(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            return false;
        };
        task.stop();
        self.refresher.store.retire_outstanding();
        info!("roster poller stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

impl Drop for RosterPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.stop();
        }
    }
}

async fn poll_loop(refresher: Refresher, interval: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = refresher.refresh() => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_net::{ApiCall, MockChatApi, MockReply};
    use proptest::prelude::*;

    const INTERVAL: Duration = Duration::from_secs(5);

    fn roster(names: &[(i64, &str)]) -> Vec<RosterEntry> {
        names.iter().map(|(id, n)| RosterEntry::new(*id, *n)).collect()
    }

    fn list_calls(api: &MockChatApi) -> usize {
        api.count_calls(|c| matches!(c, ApiCall::ListUsers))
    }

    fn poller(api: &Arc<MockChatApi>) -> RosterPoller {
        RosterPoller::new(api.clone(), EventSink::default())
    }

    #[tokio::test(start_paused = true)]
    async fn start_fetches_immediately_then_on_interval() {
        let api = Arc::new(MockChatApi::with_users(roster(&[(1, "alice"), (2, "bob")])));
        let poller = poller(&api);

        poller.start(INTERVAL);
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(list_calls(&api), 1);
        assert_eq!(poller.store().snapshot().len(), 2);

        time::sleep(INTERVAL).await;
        assert_eq!(list_calls(&api), 2);
        time::sleep(INTERVAL).await;
        assert_eq!(list_calls(&api), 3);
    }

    #[tokio::test]
    async fn repeated_ids_collapse_to_first_entry() {
        let api = Arc::new(MockChatApi::new());
        api.script_roster(MockReply::ok(roster(&[(2, "bob"), (3, "carol"), (2, "bobby")])));
        let poller = poller(&api);

        let applied = poller.refresh_now().await.unwrap();
        assert_eq!(applied, roster(&[(2, "bob"), (3, "carol")]));
        assert_eq!(poller.store().visible(UserId::new(1)), roster(&[(2, "bob"), (3, "carol")]));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_previous_snapshot() {
        let api = Arc::new(MockChatApi::new());
        api.script_roster(MockReply::ok(roster(&[(1, "alice"), (2, "bob")])));
        api.script_roster(MockReply::err(FetchError::Network("reset".into())));
        let poller = poller(&api);

        poller.refresh_now().await.unwrap();
        assert!(poller.refresh_now().await.is_err());
        assert_eq!(poller.store().snapshot(), roster(&[(1, "alice"), (2, "bob")]));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_halts_fetching() {
        let api = Arc::new(MockChatApi::new());
        let poller = poller(&api);

        poller.start(INTERVAL);
        time::sleep(Duration::from_millis(1)).await;
        assert!(poller.stop());
        assert!(!poller.stop());
        assert!(!poller.is_running());

        time::sleep(INTERVAL * 3).await;
        assert_eq!(list_calls(&api), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_a_single_timer() {
        let api = Arc::new(MockChatApi::new());
        let poller = poller(&api);

        poller.start(INTERVAL);
        poller.start(INTERVAL);
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(list_calls(&api), 1);

        time::sleep(INTERVAL).await;
        assert_eq!(list_calls(&api), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_the_timer() {
        let api = Arc::new(MockChatApi::new());
        {
            let poller = poller(&api);
            poller.start(INTERVAL);
            time::sleep(Duration::from_millis(1)).await;
        }
        time::sleep(INTERVAL * 2).await;
        assert_eq!(list_calls(&api), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_response_does_not_overwrite_newer_one() {
        let api = Arc::new(MockChatApi::new());
        api.script_roster(MockReply::ok(roster(&[(1, "old")])).after(Duration::from_secs(3)));
        api.script_roster(MockReply::ok(roster(&[(1, "alice"), (2, "new")])));
        let poller = poller(&api);

        let (slow, fast) = tokio::join!(poller.refresh_now(), poller.refresh_now());
        assert!(slow.is_ok() && fast.is_ok());
        assert_eq!(poller.store().snapshot(), roster(&[(1, "alice"), (2, "new")]));
    }

    #[tokio::test(start_paused = true)]
    async fn response_landing_after_stop_is_dropped() {
        let api = Arc::new(MockChatApi::new());
        api.script_roster(MockReply::ok(roster(&[(9, "late")])).after(Duration::from_secs(2)));
        let poller = Arc::new(poller(&api));

        poller.start(INTERVAL);
        let manual = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.refresh_now().await })
        };
        time::sleep(Duration::from_millis(1)).await;
        let _ = poller.stop();
        let _ = manual.await.unwrap();
        assert!(poller.store().snapshot().iter().all(|e| e.username != "late"));
    }

    #[tokio::test]
    async fn listener_and_event_fire_on_apply() {
        let api = Arc::new(MockChatApi::with_users(roster(&[(1, "alice")])));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = EventSink::default();
        let mut rx = sink.subscribe();
        let listener: RosterListener = {
            let seen = Arc::clone(&seen);
            Arc::new(move |entries| seen.lock().push(entries.len()))
        };
        let poller = RosterPoller::new(api.clone(), sink).with_listener(listener);

        poller.refresh_now().await.unwrap();
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::RosterUpdated {
                entries: roster(&[(1, "alice")])
            }
        );
    }

    #[test]
    fn visible_roster_excludes_self() {
        let store = RosterStore::new();
        assert!(store.apply(store.issue(), roster(&[(1, "alice"), (2, "bob"), (3, "carol")])));
        let names: Vec<String> = store
            .visible(UserId::new(1))
            .into_iter()
            .map(|e| e.username)
            .collect();
        assert_eq!(names, vec!["bob", "carol"]);
        assert!(store.contains(UserId::new(1)));
        assert_eq!(store.find_by_name("carol").map(|e| e.id), Some(UserId::new(3)));
    }

    fn arb_roster() -> impl Strategy<Value = Vec<RosterEntry>> {
        prop::collection::vec((1i64..50, "[a-z]{1,6}"), 0..6)
            .prop_map(|v| v.into_iter().map(|(id, n)| RosterEntry::new(id, n)).collect())
    }

    proptest! {
        #[test]
        fn snapshot_is_replaced_not_merged(rosters in prop::collection::vec(arb_roster(), 1..6)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let api = Arc::new(MockChatApi::new());
                for r in &rosters {
                    api.script_roster(MockReply::ok(r.clone()));
                }
                let poller = RosterPoller::new(api.clone(), EventSink::default());
                for r in &rosters {
                    poller.refresh_now().await.unwrap();
                    assert_eq!(&poller.store().snapshot(), r);
                }
            });
        }
    }
}
