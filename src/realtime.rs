//! Push listener: the record store's realtime change feed.
//!
//! The feed speaks the Phoenix channel protocol (JSON serializer, `vsn=1.0.0`)
//! over a websocket. One listener task per flow:
//!
//! 1. connects to `{base}/realtime/v1/websocket?apikey=..&vsn=1.0.0`
//! 2. joins `realtime:<table>_<flow id>_<suffix>` with a `postgres_changes`
//!    subscription for every event on the drafts table filtered by `flow_id`
//! 3. forwards each change's `record` as a [`DraftPayload`], heartbeating on
//!    the `phoenix` topic meanwhile
//! 4. on shutdown, sends `phx_leave` and closes the socket
//!
//! A dropped connection is retried after 1 s, 2 s, 5 s, then every 10 s.
//! The retry is best effort; the poll loop covers whatever it misses.

use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::channels::{ChannelEvent, ChannelSource, EventSink, PushStatus};
use crate::draft::{DraftPayload, FlowId};
use crate::errors::FeedError;
use crate::store::{DEFAULT_DRAFTS_TABLE, DEFAULT_SCHEMA};

const PROTOCOL_VSN: &str = "1.0.0";
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(25);
const RECONNECT_DELAYS: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];
/// Upper bound on the goodbye exchange when a subscription is closed.
const LEAVE_GRACE: Duration = Duration::from_secs(1);

/// Source of push notifications for one flow.
pub trait ChangeFeed: Send + Sync {
    /// Start listening for changes to `flow_id`'s row, reporting into `sink`.
    fn subscribe(&self, flow_id: &FlowId, sink: EventSink) -> FeedSubscription;
}

/// Handle to a running listener. Dropping it unsubscribes.
pub struct FeedSubscription {
    shutdown: Option<oneshot::Sender<()>>,
    /// Detached on drop; the listener ends by itself after leaving the channel.
    _task: JoinHandle<()>,
}

impl FeedSubscription {
    pub fn new(shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
            _task: task,
        }
    }

    /// Ask the listener to leave its channel and stop.
    pub fn close(mut self) {
        self.signal_shutdown();
    }

    fn signal_shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            // The listener may already be gone; nothing left to stop then.
            let _ = tx.send(());
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

/// One Phoenix protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// What an inbound frame means for the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Changed(DraftPayload),
    JoinAccepted,
    JoinRejected(String),
    ChannelClosed(String),
    Ignored,
}

/// Settings for [`RealtimeFeed`].
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub base_url: String,
    pub anon_key: String,
    pub schema: String,
    pub table: String,
    pub heartbeat_interval: Duration,
}

impl RealtimeSettings {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_DRAFTS_TABLE.to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT,
        }
    }
}

/// Websocket endpoint for a record store base URL (`https` → `wss`, `http` → `ws`).
pub fn websocket_url(base_url: &str, anon_key: &str) -> Result<reqwest::Url, FeedError> {
    let invalid = || FeedError::InvalidEndpoint(base_url.to_string());
    let mut url = reqwest::Url::parse(base_url.trim_end_matches('/')).map_err(|_| invalid())?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return Err(invalid()),
    };
    url.set_scheme(scheme).map_err(|_| invalid())?;
    let path = format!("{}/realtime/v1/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", PROTOCOL_VSN);
    Ok(url)
}

/// Channel topic for one subscription. The random suffix keeps two
/// subscriptions for the same flow from sharing server-side state.
pub fn channel_topic(table: &str, flow_id: &FlowId) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(7)
        .collect();
    format!("realtime:{}_{}_{}", table, flow_id, suffix)
}

pub fn join_message(
    topic: &str,
    settings: &RealtimeSettings,
    flow_id: &FlowId,
    reference: &str,
) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": {"ack": false, "self": false},
                "presence": {"key": ""},
                "postgres_changes": [{
                    "event": "*",
                    "schema": settings.schema,
                    "table": settings.table,
                    "filter": format!("flow_id=eq.{}", flow_id),
                }],
                "private": false,
            },
            "access_token": settings.anon_key,
        }),
        reference: Some(reference.to_string()),
        join_ref: Some(reference.to_string()),
    }
}

pub fn heartbeat_message(reference: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    }
}

pub fn leave_message(topic: &str, reference: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_leave".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    }
}

/// Interpret a frame received on `topic`, whose join was sent with `join_ref`.
///
/// Change frames carry the new row under `data.record`; deletes only carry
/// `old_record` and therefore yield an empty payload. The legacy per-event
/// format (`INSERT`/`UPDATE`/`DELETE` with a top-level `record`) is accepted too.
pub fn classify(msg: &PhoenixMessage, topic: &str, join_ref: &str) -> Inbound {
    if msg.topic != topic {
        return Inbound::Ignored;
    }
    match msg.event.as_str() {
        "phx_reply" if msg.reference.as_deref() == Some(join_ref) => {
            let status = msg.payload.get("status").and_then(Value::as_str);
            if status == Some("ok") {
                Inbound::JoinAccepted
            } else {
                let reason = msg
                    .payload
                    .pointer("/response/reason")
                    .and_then(Value::as_str)
                    .or(status)
                    .unwrap_or("unknown")
                    .to_string();
                Inbound::JoinRejected(reason)
            }
        }
        "postgres_changes" => {
            Inbound::Changed(record_payload(msg.payload.pointer("/data/record")))
        }
        "INSERT" | "UPDATE" | "DELETE" => {
            Inbound::Changed(record_payload(msg.payload.get("record")))
        }
        "system" if msg.payload.get("status").and_then(Value::as_str) == Some("error") => {
            let message = msg
                .payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("subscription error");
            Inbound::JoinRejected(message.to_string())
        }
        "phx_error" => Inbound::ChannelClosed("channel error".to_string()),
        "phx_close" => Inbound::ChannelClosed("channel closed by server".to_string()),
        _ => Inbound::Ignored,
    }
}

fn record_payload(record: Option<&Value>) -> DraftPayload {
    record
        .and_then(|r| serde_json::from_value(r.clone()).ok())
        .unwrap_or_default()
}

/// Realtime change feed of the record store.
#[derive(Debug, Clone)]
pub struct RealtimeFeed {
    settings: Arc<RealtimeSettings>,
}

impl RealtimeFeed {
    pub fn new(settings: RealtimeSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl ChangeFeed for RealtimeFeed {
    fn subscribe(&self, flow_id: &FlowId, sink: EventSink) -> FeedSubscription {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(run_listener(
            self.settings.clone(),
            flow_id.clone(),
            sink,
            rx,
        ));
        FeedSubscription::new(tx, task)
    }
}

enum SessionEnd {
    Shutdown,
    SinkClosed,
    Fatal(FeedError),
    Lost { error: FeedError, joined: bool },
}

async fn run_listener(
    settings: Arc<RealtimeSettings>,
    flow_id: FlowId,
    sink: EventSink,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut attempt = 0usize;
    loop {
        match listen_once(&settings, &flow_id, &sink, &mut shutdown).await {
            SessionEnd::Shutdown | SessionEnd::SinkClosed => return,
            SessionEnd::Fatal(error) => {
                tracing::error!(flow_id = %flow_id, error = %error, "realtime listener disabled");
                return;
            }
            SessionEnd::Lost { error, joined } => {
                if joined {
                    attempt = 0;
                }
                let delay = RECONNECT_DELAYS[attempt.min(RECONNECT_DELAYS.len() - 1)];
                attempt += 1;
                tracing::warn!(
                    flow_id = %flow_id,
                    error = %error,
                    retry_in = ?delay,
                    "realtime connection lost"
                );
                let status = ChannelEvent::Push {
                    flow_id: flow_id.clone(),
                    status: PushStatus::Disconnected {
                        reason: error.to_string(),
                    },
                };
                if sink.send(status).await.is_err() {
                    return;
                }
                tokio::select! {
                    _ = &mut shutdown => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn listen_once(
    settings: &RealtimeSettings,
    flow_id: &FlowId,
    sink: &EventSink,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let url = match websocket_url(&settings.base_url, &settings.anon_key) {
        Ok(url) => url,
        Err(e) => return SessionEnd::Fatal(e),
    };

    let connected = tokio::select! {
        _ = &mut *shutdown => return SessionEnd::Shutdown,
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };
    let (socket, _) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            return SessionEnd::Lost {
                error: FeedError::Connect(e),
                joined: false,
            };
        }
    };
    let (mut write, mut read) = socket.split();

    let topic = channel_topic(&settings.table, flow_id);
    let mut refs = 0u64;
    let mut next_ref = move || {
        refs += 1;
        refs.to_string()
    };
    let join_ref = next_ref();
    let lost = |error, joined| SessionEnd::Lost { error, joined };

    let join = join_message(&topic, settings, flow_id, &join_ref);
    if let Err(e) = send_frame(&mut write, &join).await {
        return lost(e, false);
    }
    tracing::debug!(flow_id = %flow_id, topic = %topic, "realtime join sent");

    let mut heartbeat = tokio::time::interval(settings.heartbeat_interval);
    // The first tick completes immediately; the join itself counts as traffic.
    heartbeat.tick().await;
    let mut joined = false;

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let leave = leave_message(&topic, &next_ref());
                let _ = tokio::time::timeout(LEAVE_GRACE, async {
                    let _ = send_frame(&mut write, &leave).await;
                    let _ = write.close().await;
                })
                .await;
                tracing::debug!(flow_id = %flow_id, topic = %topic, "realtime channel left");
                return SessionEnd::Shutdown;
            }

            _ = heartbeat.tick() => {
                if let Err(e) = send_frame(&mut write, &heartbeat_message(&next_ref())).await {
                    return lost(e, joined);
                }
            }

            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return lost(FeedError::Closed, joined),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return lost(FeedError::Connect(e), joined),
                };
                let msg: PhoenixMessage = match serde_json::from_str(text.as_str()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping malformed realtime frame");
                        continue;
                    }
                };

                let event = match classify(&msg, &topic, &join_ref) {
                    Inbound::Changed(payload) => {
                        tracing::debug!(flow_id = %flow_id, "realtime change received");
                        ChannelEvent::Payload {
                            flow_id: flow_id.clone(),
                            source: ChannelSource::Push,
                            payload,
                        }
                    }
                    Inbound::JoinAccepted => {
                        joined = true;
                        tracing::info!(flow_id = %flow_id, topic = %topic, "realtime subscribed");
                        ChannelEvent::Push {
                            flow_id: flow_id.clone(),
                            status: PushStatus::Subscribed,
                        }
                    }
                    Inbound::JoinRejected(reason) => {
                        return lost(FeedError::JoinRejected { topic, reason }, joined);
                    }
                    Inbound::ChannelClosed(reason) => {
                        tracing::debug!(flow_id = %flow_id, %reason, "realtime channel ended");
                        return lost(FeedError::Closed, joined);
                    }
                    Inbound::Ignored => continue,
                };
                if sink.send(event).await.is_err() {
                    return SessionEnd::SinkClosed;
                }
            }
        }
    }
}

async fn send_frame<S>(write: &mut S, msg: &PhoenixMessage) -> Result<(), FeedError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(msg).map_err(|e| FeedError::Malformed(e.to_string()))?;
    write
        .send(Message::Text(text.into()))
        .await
        .map_err(FeedError::Connect)
}
