//! Workflow webhooks: start a generation job and approve its result.
//!
//! Both calls are fire-and-forget JSON POSTs. Any 2xx answer is success; the
//! body is ignored because generated content only ever arrives through the
//! record store.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::draft::{FlowId, PostRequest};
use crate::errors::GatewayError;

pub const DEFAULT_START_WEBHOOK: &str = "https://basemen.app.n8n.cloud/webhook/linkedin-start";
pub const DEFAULT_APPROVE_WEBHOOK: &str = "https://basemen.app.n8n.cloud/webhook/linkedin-approve";

/// Abstraction over the external job starter for testability.
/// Real implementation: `WebhookGateway`.
#[async_trait]
pub trait JobGateway: Send + Sync {
    async fn start_job(&self, request: &PostRequest, flow_id: &FlowId) -> Result<(), GatewayError>;

    async fn approve_job(&self, flow_id: &FlowId, text: &str) -> Result<(), GatewayError>;
}

#[derive(Debug, Serialize)]
struct StartBody<'a> {
    topic: &'a str,
    audience: &'a str,
    #[serde(rename = "flowId")]
    flow_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ApproveBody<'a> {
    #[serde(rename = "flowId")]
    flow_id: &'a str,
    text: &'a str,
}

/// HTTP client for the two workflow webhooks.
#[derive(Debug, Clone)]
pub struct WebhookGateway {
    client: reqwest::Client,
    start_url: String,
    approve_url: String,
}

impl WebhookGateway {
    pub fn new(
        start_url: impl Into<String>,
        approve_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let start_url = start_url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| GatewayError::Transport {
                url: start_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            start_url,
            approve_url: approve_url.into(),
        })
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<(), GatewayError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| GatewayError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobGateway for WebhookGateway {
    async fn start_job(&self, request: &PostRequest, flow_id: &FlowId) -> Result<(), GatewayError> {
        tracing::debug!(flow_id = %flow_id, url = %self.start_url, "starting generation job");
        let body = StartBody {
            topic: &request.topic,
            audience: &request.audience,
            flow_id: flow_id.as_str(),
        };
        self.post_json(&self.start_url, &body).await
    }

    async fn approve_job(&self, flow_id: &FlowId, text: &str) -> Result<(), GatewayError> {
        tracing::debug!(flow_id = %flow_id, url = %self.approve_url, "approving draft");
        let body = ApproveBody {
            flow_id: flow_id.as_str(),
            text,
        };
        self.post_json(&self.approve_url, &body).await
    }
}
