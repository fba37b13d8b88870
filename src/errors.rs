//! Typed error hierarchy for draftflow.
//!
//! One enum per collaborator, plus the lifecycle enum the session surfaces:
//! - `GatewayError`: job-start and job-approve webhook calls
//! - `StoreError`: record store reads (poll loop, suggested topics)
//! - `FeedError`: realtime push channel
//! - `FlowError`: what `FlowSession` reports to its caller

use thiserror::Error;

/// Errors from the workflow webhooks.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Request to {url} could not be sent: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Errors from the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend has not written the row yet. Not a failure for the poll loop.
    #[error("No draft row for flow {flow_id}")]
    NotFound { flow_id: String },

    #[error("Expected one draft row for flow {flow_id}, found {count}")]
    Ambiguous { flow_id: String, count: usize },

    #[error("Record store request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Record store responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Record store returned an unexpected body: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors from the realtime change feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid realtime endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Realtime connection failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("Realtime join for {topic} rejected: {reason}")]
    JoinRejected { topic: String, reason: String },

    #[error("Realtime connection closed")]
    Closed,

    #[error("Malformed realtime message: {0}")]
    Malformed(String),
}

/// Errors surfaced by the request lifecycle.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid post request: {0}")]
    InvalidRequest(String),

    #[error("Could not start post generation: {0}")]
    SubmissionFailed(#[source] GatewayError),

    #[error("Could not approve post for flow {flow_id}: {source}")]
    ApprovalFailed {
        flow_id: String,
        #[source]
        source: GatewayError,
    },

    #[error("No generation flow is active")]
    NoActiveFlow,

    #[error("Flow {flow_id} is still generating")]
    StillGenerating { flow_id: String },

    #[error("Flow {flow_id} has no text to approve")]
    NothingToApprove { flow_id: String },

    #[error("Update channels for flow {flow_id} closed before the draft was ready")]
    ChannelsClosed { flow_id: String },
}
