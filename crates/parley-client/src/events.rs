use tokio::sync::broadcast;
use tracing::trace;

use parley_core::events::SessionEvent;

const EVENT_CAPACITY: usize = 256;

/// Publishing side of the session event broadcast.
///
/// Sending with no subscribers is not an error; the UI may not be attached yet.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        trace!(kind = event.kind(), "session event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_fine() {
        EventSink::default().emit(SessionEvent::LoggedOut);
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let sink = EventSink::new(8);
        let mut rx = sink.subscribe();
        sink.emit(SessionEvent::PeerCleared);
        sink.emit(SessionEvent::LoggedOut);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::PeerCleared);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::LoggedOut);
    }
}
