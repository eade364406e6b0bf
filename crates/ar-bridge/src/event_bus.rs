use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use ar_core::types::{ActivityEntry, Issue, IssueState};
use ar_engine::runner::EventPublisher;
use ar_integrations::types::IngestSink;

use crate::protocol::HubFrame;

/// Outbound queue depth per subscriber; a subscriber this far behind is
/// evicted rather than allowed to stall broadcasters.
const SUBSCRIBER_QUEUE_CAP: usize = 64;

/// A live subscription: the id to unsubscribe with and the frame stream.
pub struct Subscription {
    pub id: Uuid,
    pub rx: flume::Receiver<Arc<str>>,
}

/// Best-effort fan-out of serialized frames to live subscribers.
///
/// `broadcast` serializes once and performs a non-blocking send to each
/// subscriber's bounded queue; a full or closed queue drops that subscriber.
/// Per-subscriber ordering is preserved; there is no delivery guarantee
/// across subscriber deaths. Cheap to clone.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<Mutex<HashMap<Uuid, flume::Sender<Arc<str>>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = flume::bounded(SUBSCRIBER_QUEUE_CAP);
        let id = Uuid::new_v4();
        self.inner
            .lock()
            .expect("hub lock poisoned")
            .insert(id, tx);
        Subscription { id, rx }
    }

    /// Drop a subscriber. Idempotent.
    pub fn unsubscribe(&self, id: Uuid) {
        self.inner.lock().expect("hub lock poisoned").remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().expect("hub lock poisoned").len()
    }

    /// Serialize once, send to everyone, evict whoever cannot keep up.
    pub fn broadcast(&self, frame: &HubFrame) {
        let json: Arc<str> = match serde_json::to_string(frame) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize hub frame");
                return;
            }
        };

        let mut subscribers = self.inner.lock().expect("hub lock poisoned");
        subscribers.retain(|id, tx| match tx.try_send(json.clone()) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) => {
                tracing::warn!(subscriber = %id, "evicting slow hub subscriber");
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        });
    }
}

// ---------------------------------------------------------------------------
// Kernel-facing adapters
// ---------------------------------------------------------------------------

/// Publishes engine and poller events onto the hub.
pub struct HubPublisher {
    hub: Hub,
}

impl HubPublisher {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

impl EventPublisher for HubPublisher {
    fn issue_state_changed(&self, issue: &Issue, from: IssueState, to: IssueState) {
        self.hub.broadcast(&HubFrame::issue_state_changed(issue, from, to));
    }

    fn build_event(&self, issue: &Issue, detail: &str) {
        self.hub.broadcast(&HubFrame::build_event(issue, detail));
    }

    fn activity(&self, entry: &ActivityEntry) {
        self.hub.broadcast(&HubFrame::activity(entry));
    }
}

impl IngestSink for HubPublisher {
    fn issue_ingested(&self, issue: &Issue) {
        self.hub.broadcast(&HubFrame::new_issue(issue));
    }
}
