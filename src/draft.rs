//! Draft state and the merge gate shared by both update channels.
//!
//! A [`Draft`] is the only mutable entity of a generation flow. It is created
//! empty when a post is requested and filled in by whatever the push
//! subscription or the poll loop reports. Every report, regardless of which
//! channel produced it, goes through [`reconcile`]:
//!
//! - a field is adopted only while the draft's copy is still empty
//! - an adopted field is never overwritten (first writer wins per field)
//! - adopting the text moves progress to [`TEXT_PROGRESS`]
//! - adopting the image moves progress to [`COMPLETE_PROGRESS`] and ends loading
//!
//! Because the rule only looks at emptiness, delivering the same payloads
//! through one channel, the other, or both in any interleaving converges on
//! the same draft, and re-delivering an adopted payload is a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress shown as soon as a request is submitted.
pub const SUBMIT_PROGRESS: u8 = 10;
/// Progress once the job starter acknowledged the request.
pub const ACCEPTED_PROGRESS: u8 = 30;
/// Progress once the post text has been adopted.
pub const TEXT_PROGRESS: u8 = 70;
/// Progress once the image has been adopted.
pub const COMPLETE_PROGRESS: u8 = 100;

/// Correlation identifier for one generation attempt.
///
/// Generated client-side as `flow-<unix millis>-<7 random chars>`. The value is
/// opaque to the backend, which only echoes it back in the `flow_id` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    /// Generate a fresh identifier from the current time and a random suffix.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(7)
            .collect();
        Self(format!("flow-{}-{}", millis, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FlowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FlowId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRequest {
    pub topic: String,
    pub audience: String,
}

impl PostRequest {
    pub fn new(topic: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            audience: audience.into(),
        }
    }

    /// Both fields are required; surrounding whitespace does not count.
    pub fn validate(&self) -> Result<(), String> {
        if self.topic.trim().is_empty() {
            return Err("topic must not be empty".to_string());
        }
        if self.audience.trim().is_empty() {
            return Err("audience must not be empty".to_string());
        }
        Ok(())
    }
}

/// Raw draft fields as reported by either channel.
///
/// Matches the `linkedin_drafts` row shape; extra columns are ignored and
/// `null` reads as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPayload {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl DraftPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            image_url: None,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            text: None,
            image_url: Some(url.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        non_empty(&self.text).is_none() && non_empty(&self.image_url).is_none()
    }
}

/// In-progress state of one generation flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub flow_id: FlowId,
    pub text: Option<String>,
    pub image_url: Option<String>,
    /// Cosmetic indicator in `0..=100`. Never gates a transition.
    pub progress: u8,
    /// True until the image is adopted.
    pub loading: bool,
    /// User edit of `text`, sent instead of it on approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_text: Option<String>,
}

impl Draft {
    /// An empty draft for a just-submitted request.
    pub fn new(flow_id: FlowId) -> Self {
        Self {
            flow_id,
            text: None,
            image_url: None,
            progress: SUBMIT_PROGRESS,
            loading: true,
            edited_text: None,
        }
    }

    pub fn has_text(&self) -> bool {
        non_empty(&self.text).is_some()
    }

    pub fn has_image(&self) -> bool {
        non_empty(&self.image_url).is_some()
    }

    /// The text to send on approval: the edit if there is one, else the adopted text.
    pub fn final_text(&self) -> Option<&str> {
        non_empty(&self.edited_text).or_else(|| non_empty(&self.text))
    }

    /// Nothing further can be adopted once both fields are set.
    pub fn is_settled(&self) -> bool {
        self.has_text() && self.has_image()
    }
}

/// Outcome of feeding one payload through [`reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merge {
    pub draft: Draft,
    pub text_adopted: bool,
    /// Set exactly once per flow: this is the "generation complete" signal.
    pub image_adopted: bool,
}

impl Merge {
    pub fn changed(&self) -> bool {
        self.text_adopted || self.image_adopted
    }

    fn unchanged(current: &Draft) -> Self {
        Self {
            draft: current.clone(),
            text_adopted: false,
            image_adopted: false,
        }
    }
}

/// The merge gate. Pure: `(current draft, incoming payload) -> new draft`.
///
/// Progress only moves forward, so an image arriving before the text leaves
/// the draft at [`COMPLETE_PROGRESS`] when the text shows up later.
pub fn reconcile(current: &Draft, incoming: &DraftPayload) -> Merge {
    if incoming.is_empty() {
        return Merge::unchanged(current);
    }

    let mut draft = current.clone();
    let mut text_adopted = false;
    let mut image_adopted = false;

    if let Some(text) = non_empty(&incoming.text)
        && !draft.has_text()
    {
        draft.text = Some(text.to_string());
        draft.progress = draft.progress.max(TEXT_PROGRESS);
        text_adopted = true;
    }

    if let Some(url) = non_empty(&incoming.image_url)
        && !draft.has_image()
    {
        draft.image_url = Some(url.to_string());
        draft.progress = COMPLETE_PROGRESS;
        draft.loading = false;
        image_adopted = true;
    }

    Merge {
        draft,
        text_adopted,
        image_adopted,
    }
}

/// Explicit state of the flow, derived from the draft fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    Idle,
    Submitting,
    AwaitingText,
    AwaitingImage,
    Ready,
    /// Only reachable when a wait timeout is configured.
    TimedOut,
}

impl FlowPhase {
    /// Phase of a draft whose job has been accepted.
    pub fn of(draft: &Draft) -> Self {
        if draft.has_image() {
            FlowPhase::Ready
        } else if draft.has_text() {
            FlowPhase::AwaitingImage
        } else {
            FlowPhase::AwaitingText
        }
    }
}

impl fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowPhase::Idle => write!(f, "idle"),
            FlowPhase::Submitting => write!(f, "submitting"),
            FlowPhase::AwaitingText => write!(f, "awaiting text"),
            FlowPhase::AwaitingImage => write!(f, "awaiting image"),
            FlowPhase::Ready => write!(f, "ready"),
            FlowPhase::TimedOut => write!(f, "timed out"),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
