//! The two update channels of a flow and their shared teardown.
//!
//! Both the push listener and the poll loop run as tokio tasks that report
//! into one bounded mpsc queue owned by the session. Nothing in here touches
//! the draft: the session is the single consumer of the queue and the only
//! writer of draft state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::draft::{DraftPayload, FlowId};
use crate::realtime::{ChangeFeed, FeedSubscription};
use crate::store::DraftStore;

/// Queue depth per flow. Producers wait when the session falls behind.
const EVENT_QUEUE_DEPTH: usize = 64;

/// Which channel produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSource {
    Push,
    Poll,
}

impl std::fmt::Display for ChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelSource::Push => write!(f, "push"),
            ChannelSource::Poll => write!(f, "poll"),
        }
    }
}

/// Connection state changes reported by the push listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    Subscribed,
    Disconnected { reason: String },
}

/// Everything a channel task can report. Each event names the flow it
/// belongs to so anything left over from a previous flow can be discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Payload {
        flow_id: FlowId,
        source: ChannelSource,
        payload: DraftPayload,
    },
    Push {
        flow_id: FlowId,
        status: PushStatus,
    },
    PollFailed {
        flow_id: FlowId,
        message: String,
    },
}

impl ChannelEvent {
    pub fn flow_id(&self) -> &FlowId {
        match self {
            ChannelEvent::Payload { flow_id, .. }
            | ChannelEvent::Push { flow_id, .. }
            | ChannelEvent::PollFailed { flow_id, .. } => flow_id,
        }
    }
}

pub type EventSink = mpsc::Sender<ChannelEvent>;

/// Spawn the poll loop for one flow.
///
/// The first lookup happens immediately, which also covers rows written
/// before the push subscription joined. A missing row is skipped silently,
/// other failures are logged and reported as [`ChannelEvent::PollFailed`].
/// The task ends when the queue's receiver is dropped or the handle aborted.
pub fn spawn_poller(
    store: Arc<dyn DraftStore>,
    flow_id: FlowId,
    interval: Duration,
    sink: EventSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            tracing::trace!(flow_id = %flow_id, "polling draft row");

            let event = match store.fetch_draft(&flow_id).await {
                Ok(payload) => ChannelEvent::Payload {
                    flow_id: flow_id.clone(),
                    source: ChannelSource::Poll,
                    payload,
                },
                Err(e) if e.is_not_found() => {
                    tracing::debug!(flow_id = %flow_id, "no draft row yet");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(flow_id = %flow_id, error = %e, "draft poll failed");
                    ChannelEvent::PollFailed {
                        flow_id: flow_id.clone(),
                        message: e.to_string(),
                    }
                }
            };

            if sink.send(event).await.is_err() {
                return;
            }
        }
    })
}

/// Both channels of one flow plus the queue they feed.
///
/// Dropping the set stops both channels: the poll task is aborted, the push
/// subscription is closed and the queue receiver goes away, so any send still
/// in flight fails and its producer exits.
pub struct ChannelSet {
    flow_id: FlowId,
    events: mpsc::Receiver<ChannelEvent>,
    poller: JoinHandle<()>,
    push: Option<FeedSubscription>,
}

impl ChannelSet {
    /// Start the poll loop and, if a feed is given, the push listener for `flow_id`.
    pub fn attach(
        flow_id: FlowId,
        store: Arc<dyn DraftStore>,
        feed: Option<&dyn ChangeFeed>,
        poll_interval: Duration,
    ) -> Self {
        let (sink, events) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let push = feed.map(|feed| feed.subscribe(&flow_id, sink.clone()));
        let poller = spawn_poller(store, flow_id.clone(), poll_interval, sink);
        tracing::debug!(flow_id = %flow_id, push = push.is_some(), "channels attached");
        Self {
            flow_id,
            events,
            poller,
            push,
        }
    }

    pub fn flow_id(&self) -> &FlowId {
        &self.flow_id
    }

    /// Next event from either channel. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

impl Drop for ChannelSet {
    fn drop(&mut self) {
        self.poller.abort();
        if let Some(push) = self.push.take() {
            push.close();
        }
        self.events.close();
        tracing::debug!(flow_id = %self.flow_id, "channels detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers "not found" a fixed number of times, then a full row.
    struct ScriptedStore {
        misses: usize,
        calls: AtomicUsize,
        fail_with_status: bool,
    }

    #[async_trait]
    impl DraftStore for ScriptedStore {
        async fn fetch_draft(&self, flow_id: &FlowId) -> Result<DraftPayload, StoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_with_status {
                return Err(StoreError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            if n < self.misses {
                return Err(StoreError::NotFound {
                    flow_id: flow_id.to_string(),
                });
            }
            Ok(DraftPayload::text("polled"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_skips_not_found_silently() {
        let store = Arc::new(ScriptedStore {
            misses: 5,
            calls: AtomicUsize::new(0),
            fail_with_status: false,
        });
        let (sink, mut rx) = mpsc::channel(8);
        let handle = spawn_poller(
            store.clone(),
            FlowId::from("flow-1-abc"),
            Duration::from_secs(3),
            sink,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 6);
        assert_eq!(
            event,
            ChannelEvent::Payload {
                flow_id: FlowId::from("flow-1-abc"),
                source: ChannelSource::Poll,
                payload: DraftPayload::text("polled"),
            }
        );
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_reports_other_failures() {
        let store = Arc::new(ScriptedStore {
            misses: 0,
            calls: AtomicUsize::new(0),
            fail_with_status: true,
        });
        let (sink, mut rx) = mpsc::channel(8);
        let handle = spawn_poller(store, FlowId::from("flow-2-abc"), Duration::from_secs(2), sink);

        match rx.recv().await.unwrap() {
            ChannelEvent::PollFailed { message, .. } => assert!(message.contains("503")),
            other => panic!("Expected PollFailed, got {:?}", other),
        }
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_stops_when_receiver_dropped() {
        let store = Arc::new(ScriptedStore {
            misses: 0,
            calls: AtomicUsize::new(0),
            fail_with_status: false,
        });
        let (sink, rx) = mpsc::channel(1);
        let handle = spawn_poller(store, FlowId::from("flow-3-abc"), Duration::from_secs(1), sink);
        drop(rx);
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("poller should exit once nobody listens")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_set_drop_stops_polling() {
        let store = Arc::new(ScriptedStore {
            misses: usize::MAX,
            calls: AtomicUsize::new(0),
            fail_with_status: false,
        });
        let set = ChannelSet::attach(
            FlowId::from("flow-4-abc"),
            store.clone(),
            None,
            Duration::from_secs(1),
        );
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let before = store.calls.load(Ordering::SeqCst);
        assert!(before >= 3);

        drop(set);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.calls.load(Ordering::SeqCst), before);
    }
}
