//! Record store reads over the PostgREST interface.
//!
//! The poll loop does a point lookup of the `linkedin_drafts` row for one
//! `flow_id`. Zero rows is reported as [`StoreError::NotFound`] so callers can
//! treat "not written yet" as the normal, silent case it is. The same client
//! also lists the suggested topics offered to the user.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

use crate::draft::{DraftPayload, FlowId};
use crate::errors::StoreError;

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_DRAFTS_TABLE: &str = "linkedin_drafts";
pub const DEFAULT_TOPICS_TABLE: &str = "suggested_topics";

/// Point lookup of a draft row by flow id.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn fetch_draft(&self, flow_id: &FlowId) -> Result<DraftPayload, StoreError>;
}

/// Listing of suggested topic/audience pairs.
#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Unused suggestions first, then alphabetical by topic.
    async fn list_topics(&self) -> Result<Vec<Suggestion>, StoreError>;
}

/// One row of `suggested_topics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub topic: String,
    pub audience: String,
    #[serde(default)]
    pub used: bool,
}

/// Ids may be uuid strings or integer keys depending on the table definition.
fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported id value: {}",
            other
        ))),
    }
}

/// Connection settings for [`RestStore`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub base_url: String,
    pub anon_key: String,
    pub schema: String,
    pub drafts_table: String,
    pub topics_table: String,
    pub timeout: Duration,
}

impl StoreSettings {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            schema: DEFAULT_SCHEMA.to_string(),
            drafts_table: DEFAULT_DRAFTS_TABLE.to_string(),
            topics_table: DEFAULT_TOPICS_TABLE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Record store client. Constructed once and shared by `Arc`.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    settings: StoreSettings,
}

impl RestStore {
    pub fn new(settings: StoreSettings) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(StoreError::Transport)?;
        Ok(Self { client, settings })
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.settings.base_url.trim_end_matches('/'),
            table
        )
    }

    async fn get_rows<T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let resp = self
            .client
            .get(self.table_url(table))
            .query(query)
            .header("apikey", &self.settings.anon_key)
            .bearer_auth(&self.settings.anon_key)
            .header("Accept-Profile", &self.settings.schema)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(StoreError::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await.map_err(StoreError::Transport)?;
        serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DraftStore for RestStore {
    async fn fetch_draft(&self, flow_id: &FlowId) -> Result<DraftPayload, StoreError> {
        let query = [
            ("flow_id", format!("eq.{}", flow_id)),
            ("select", "text,image_url".to_string()),
        ];
        let mut rows: Vec<DraftPayload> = self.get_rows(&self.settings.drafts_table, &query).await?;
        match rows.len() {
            0 => Err(StoreError::NotFound {
                flow_id: flow_id.to_string(),
            }),
            1 => Ok(rows.remove(0)),
            count => Err(StoreError::Ambiguous {
                flow_id: flow_id.to_string(),
                count,
            }),
        }
    }
}

#[async_trait]
impl TopicStore for RestStore {
    async fn list_topics(&self) -> Result<Vec<Suggestion>, StoreError> {
        let query = [
            ("select", "id,topic,audience,used".to_string()),
            ("order", "used.asc,topic.asc".to_string()),
        ];
        self.get_rows(&self.settings.topics_table, &query).await
    }
}
