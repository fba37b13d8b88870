//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled        |
//! |------------|-------------------------|
//! | `generate` | `Generate`, `Watch`     |
//! | `approve`  | `Approve`               |
//! | `topics`   | `Topics`                |
//! | `config`   | `Config`                |

pub mod approve;
pub mod config;
pub mod generate;
pub mod topics;

pub use approve::cmd_approve;
pub use config::cmd_config;
pub use generate::{GenerateArgs, WatchArgs, cmd_generate, cmd_watch};
pub use topics::cmd_topics;

use anyhow::{Context, Result};
use std::sync::Arc;

use draftflow::config::Config;
use draftflow::realtime::{ChangeFeed, RealtimeFeed};
use draftflow::session::FlowSession;
use draftflow::store::RestStore;
use draftflow::webhook::WebhookGateway;

pub(crate) fn webhook_gateway(config: &Config) -> Result<WebhookGateway> {
    let hooks = &config.toml.webhooks;
    WebhookGateway::new(
        hooks.start_url.clone(),
        hooks.approve_url.clone(),
        config.request_timeout(),
    )
    .context("Failed to build webhook client")
}

pub(crate) fn rest_store(config: &Config) -> Result<RestStore> {
    RestStore::new(config.store_settings()?).context("Failed to build record store client")
}

/// Wire the real webhook, store and realtime clients into a session.
pub(crate) fn build_session(config: &Config) -> Result<FlowSession> {
    let settings = config.session_settings();
    let feed: Option<Arc<dyn ChangeFeed>> = if settings.realtime {
        Some(Arc::new(RealtimeFeed::new(config.realtime_settings()?)))
    } else {
        None
    };
    Ok(FlowSession::new(
        Arc::new(webhook_gateway(config)?),
        Arc::new(rest_store(config)?),
        feed,
        settings,
    ))
}
