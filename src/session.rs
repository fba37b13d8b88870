//! Request lifecycle for one generation flow at a time.
//!
//! `FlowSession` owns the current [`Draft`] and is its only writer. Channel
//! tasks report into a queue; the caller drives [`FlowSession::next_update`]
//! (or [`FlowSession::wait_until_ready`]), which pops one event and applies it
//! through [`reconcile`]. All draft mutations therefore happen on the caller's
//! task, in queue order, and no locking is involved.
//!
//! ```text
//! Idle ──start()──> Submitting ──2xx──> AwaitingText ──text──> AwaitingImage ──image──> Ready
//!   ^                   │                     │                      │                   │
//!   └──── non-2xx ──────┘                     └──── reset() / approve() / drop ──────────┘
//! ```
//!
//! Channels are torn down together on `reset`, on a new `start`, once both
//! fields are adopted, on timeout and when the session is dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::channels::{ChannelEvent, ChannelSet, ChannelSource, PushStatus};
use crate::draft::{
    ACCEPTED_PROGRESS, Draft, DraftPayload, FlowId, FlowPhase, PostRequest, reconcile,
};
use crate::errors::FlowError;
use crate::realtime::ChangeFeed;
use crate::store::DraftStore;
use crate::webhook::JobGateway;

/// Default poll period of the fallback loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Tunables of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    /// Give up after this long without an image. `None` waits forever.
    pub wait_timeout: Option<Duration>,
    /// Attach the push listener in addition to the poll loop.
    pub realtime: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_timeout: None,
            realtime: true,
        }
    }
}

/// Diagnostics about the two channels. Purely informational.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelHealth {
    pub push_connected: bool,
    pub last_push_error: Option<String>,
    pub last_poll_error: Option<String>,
    pub push_events: u32,
    pub poll_events: u32,
    pub last_event_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// What a single processed event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowUpdate {
    /// The payload filled at least one empty field.
    Merged {
        source: ChannelSource,
        text_adopted: bool,
        image_adopted: bool,
        progress: u8,
    },
    /// The payload carried nothing new, or belonged to another flow.
    Ignored { source: ChannelSource },
    /// A channel status change; see [`FlowSession::health`].
    Health,
    /// The wait timeout elapsed before the image arrived.
    TimedOut,
}

#[derive(Debug)]
enum FlowState {
    Idle,
    Submitting(Draft),
    Active(Draft),
    TimedOut(Draft),
}

/// Drives one generation flow: submit, follow both channels, approve or reset.
pub struct FlowSession {
    gateway: Arc<dyn JobGateway>,
    store: Arc<dyn DraftStore>,
    feed: Option<Arc<dyn ChangeFeed>>,
    settings: SessionSettings,
    state: FlowState,
    channels: Option<ChannelSet>,
    deadline: Option<Instant>,
    health: ChannelHealth,
}

enum Wake {
    Event(Option<ChannelEvent>),
    Deadline,
}

impl FlowSession {
    pub fn new(
        gateway: Arc<dyn JobGateway>,
        store: Arc<dyn DraftStore>,
        feed: Option<Arc<dyn ChangeFeed>>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            feed,
            settings,
            state: FlowState::Idle,
            channels: None,
            deadline: None,
            health: ChannelHealth::default(),
        }
    }

    pub fn phase(&self) -> FlowPhase {
        match &self.state {
            FlowState::Idle => FlowPhase::Idle,
            FlowState::Submitting(_) => FlowPhase::Submitting,
            FlowState::Active(draft) => FlowPhase::of(draft),
            FlowState::TimedOut(_) => FlowPhase::TimedOut,
        }
    }

    pub fn draft(&self) -> Option<&Draft> {
        match &self.state {
            FlowState::Idle => None,
            FlowState::Submitting(draft)
            | FlowState::Active(draft)
            | FlowState::TimedOut(draft) => Some(draft),
        }
    }

    pub fn flow_id(&self) -> Option<&FlowId> {
        self.draft().map(|d| &d.flow_id)
    }

    pub fn progress(&self) -> u8 {
        self.draft().map_or(0, |d| d.progress)
    }

    pub fn is_loading(&self) -> bool {
        self.draft().is_some_and(|d| d.loading) && self.phase() != FlowPhase::TimedOut
    }

    pub fn health(&self) -> &ChannelHealth {
        &self.health
    }

    /// Whether either channel is still attached.
    pub fn is_listening(&self) -> bool {
        self.channels.is_some()
    }

    /// Submit a new request and start following it.
    ///
    /// Any previous flow is discarded first. Both channels are attached
    /// before the job-start call so nothing written in the meantime is
    /// missed; events that arrive during the call wait in the queue. Returns
    /// as soon as the job starter acknowledges: the job's outcome is only
    /// ever observed through the channels.
    pub async fn start(&mut self, request: PostRequest) -> Result<FlowId, FlowError> {
        request.validate().map_err(FlowError::InvalidRequest)?;
        self.reset();

        let flow_id = FlowId::generate();
        tracing::info!(flow_id = %flow_id, topic = %request.topic, "submitting post request");
        self.state = FlowState::Submitting(Draft::new(flow_id.clone()));
        self.channels = Some(self.attach(&flow_id));

        if let Err(e) = self.gateway.start_job(&request, &flow_id).await {
            tracing::warn!(flow_id = %flow_id, error = %e, "job start failed");
            self.reset();
            return Err(FlowError::SubmissionFailed(e));
        }

        self.accept(flow_id.clone());
        Ok(flow_id)
    }

    /// Follow a flow that was started elsewhere, without calling the job starter.
    pub fn resume(&mut self, flow_id: FlowId) {
        self.reset();
        tracing::info!(flow_id = %flow_id, "resuming flow");
        self.channels = Some(self.attach(&flow_id));
        self.accept(flow_id);
    }

    fn accept(&mut self, flow_id: FlowId) {
        let mut draft = Draft::new(flow_id);
        draft.progress = ACCEPTED_PROGRESS;
        self.state = FlowState::Active(draft);
        // A timeout too large to represent means no deadline at all.
        self.deadline = self
            .settings
            .wait_timeout
            .and_then(|t| Instant::now().checked_add(t));
    }

    fn attach(&self, flow_id: &FlowId) -> ChannelSet {
        let feed = if self.settings.realtime {
            self.feed.as_deref()
        } else {
            None
        };
        ChannelSet::attach(
            flow_id.clone(),
            self.store.clone(),
            feed,
            self.settings.poll_interval,
        )
    }

    /// Discard the draft and flow id and detach both channels.
    pub fn reset(&mut self) {
        if let Some(channels) = self.channels.take() {
            tracing::debug!(flow_id = %channels.flow_id(), "resetting flow");
        }
        self.state = FlowState::Idle;
        self.deadline = None;
        self.health = ChannelHealth::default();
    }

    /// Store a user edit; it replaces the generated text on approval.
    pub fn edit(&mut self, text: impl Into<String>) -> Result<(), FlowError> {
        match &mut self.state {
            FlowState::Active(draft) | FlowState::TimedOut(draft) => {
                draft.edited_text = Some(text.into());
                Ok(())
            }
            _ => Err(FlowError::NoActiveFlow),
        }
    }

    /// Send the displayed text (the edit if any) to the approval webhook.
    ///
    /// Only allowed once generation finished or timed out. On failure the
    /// draft is left as it was so the caller can retry; on success the
    /// session resets.
    pub async fn approve(&mut self) -> Result<(), FlowError> {
        let draft = match &self.state {
            FlowState::Active(draft) | FlowState::TimedOut(draft) => draft,
            _ => return Err(FlowError::NoActiveFlow),
        };
        let flow_id = draft.flow_id.clone();
        if self.is_loading() {
            return Err(FlowError::StillGenerating {
                flow_id: flow_id.to_string(),
            });
        }
        let text = draft
            .final_text()
            .ok_or_else(|| FlowError::NothingToApprove {
                flow_id: flow_id.to_string(),
            })?
            .to_string();

        self.gateway
            .approve_job(&flow_id, &text)
            .await
            .map_err(|source| FlowError::ApprovalFailed {
                flow_id: flow_id.to_string(),
                source,
            })?;

        tracing::info!(flow_id = %flow_id, "draft approved");
        self.reset();
        Ok(())
    }

    /// Feed one payload through the merge gate. Both channels end up here.
    pub fn ingest(&mut self, source: ChannelSource, payload: &DraftPayload) -> FlowUpdate {
        let FlowState::Active(draft) = &mut self.state else {
            return FlowUpdate::Ignored { source };
        };

        let merge = reconcile(draft, payload);
        if !merge.changed() {
            return FlowUpdate::Ignored { source };
        }
        *draft = merge.draft;

        if merge.text_adopted {
            tracing::info!(flow_id = %draft.flow_id, %source, "post text received");
        }
        if merge.image_adopted {
            tracing::info!(
                flow_id = %draft.flow_id,
                %source,
                "post image received, generation complete"
            );
        }
        let progress = draft.progress;
        if draft.is_settled() {
            self.channels = None;
            self.deadline = None;
        }

        FlowUpdate::Merged {
            source,
            text_adopted: merge.text_adopted,
            image_adopted: merge.image_adopted,
            progress,
        }
    }

    /// Wait for and apply the next channel event.
    ///
    /// Returns `None` when no channel is attached (idle, reset, settled or
    /// timed out), so a caller's loop ends naturally.
    pub async fn next_update(&mut self) -> Option<FlowUpdate> {
        let deadline = self.deadline;
        let wake = {
            let channels = self.channels.as_mut()?;
            let expiry = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                event = channels.recv() => Wake::Event(event),
                _ = expiry => Wake::Deadline,
            }
        };

        match wake {
            Wake::Deadline => {
                self.time_out();
                Some(FlowUpdate::TimedOut)
            }
            Wake::Event(None) => {
                self.channels = None;
                None
            }
            Wake::Event(Some(event)) => Some(self.handle(event)),
        }
    }

    /// Drive the session until both fields arrived or the flow times out.
    ///
    /// `on_update` sees the session after every processed event.
    pub async fn wait_until_ready<F>(&mut self, mut on_update: F) -> Result<FlowPhase, FlowError>
    where
        F: FnMut(&FlowSession, &FlowUpdate),
    {
        loop {
            if self.phase() == FlowPhase::Idle {
                return Err(FlowError::NoActiveFlow);
            }
            if let Some(phase) = self.finished_phase() {
                return Ok(phase);
            }
            match self.next_update().await {
                Some(update) => on_update(self, &update),
                None if self.finished_phase().is_some() => continue,
                None => {
                    let flow_id = self.flow_id().map(ToString::to_string).unwrap_or_default();
                    return Err(FlowError::ChannelsClosed { flow_id });
                }
            }
        }
    }

    /// `Ready` once text and image are in, `TimedOut` after the deadline.
    fn finished_phase(&self) -> Option<FlowPhase> {
        match &self.state {
            FlowState::TimedOut(_) => Some(FlowPhase::TimedOut),
            FlowState::Active(draft) if draft.is_settled() => Some(FlowPhase::Ready),
            _ => None,
        }
    }

    fn handle(&mut self, event: ChannelEvent) -> FlowUpdate {
        if self.flow_id() != Some(event.flow_id()) {
            tracing::debug!(flow_id = %event.flow_id(), "dropping event for a stale flow");
            return match event {
                ChannelEvent::Payload { source, .. } => FlowUpdate::Ignored { source },
                _ => FlowUpdate::Health,
            };
        }

        match event {
            ChannelEvent::Payload {
                source, payload, ..
            } => {
                self.health.last_event_at = Some(chrono::Utc::now());
                match source {
                    ChannelSource::Push => self.health.push_events += 1,
                    ChannelSource::Poll => {
                        self.health.poll_events += 1;
                        self.health.last_poll_error = None;
                    }
                }
                self.ingest(source, &payload)
            }
            ChannelEvent::Push { status, .. } => {
                match status {
                    PushStatus::Subscribed => {
                        self.health.push_connected = true;
                        self.health.last_push_error = None;
                    }
                    PushStatus::Disconnected { reason } => {
                        self.health.push_connected = false;
                        self.health.last_push_error = Some(reason);
                    }
                }
                FlowUpdate::Health
            }
            ChannelEvent::PollFailed { message, .. } => {
                self.health.last_poll_error = Some(message);
                FlowUpdate::Health
            }
        }
    }

    fn time_out(&mut self) {
        self.channels = None;
        self.deadline = None;
        let state = std::mem::replace(&mut self.state, FlowState::Idle);
        self.state = match state {
            FlowState::Active(draft) => {
                tracing::warn!(flow_id = %draft.flow_id, "gave up waiting for the generated post");
                FlowState::TimedOut(draft)
            }
            other => other,
        };
    }
}
