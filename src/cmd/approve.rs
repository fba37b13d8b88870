//! One-shot approval of a finished flow (`draftflow approve`).

use anyhow::{Context, Result, bail};
use std::path::Path;

use draftflow::config::Config;
use draftflow::draft::FlowId;
use draftflow::errors::FlowError;
use draftflow::ui::icons::CHECK;
use draftflow::webhook::JobGateway;

use super::webhook_gateway;

pub async fn cmd_approve(
    config: &Config,
    flow_id: &str,
    text: Option<&str>,
    file: Option<&Path>,
) -> Result<()> {
    let flow_id = FlowId::from(flow_id.trim());
    if flow_id.as_str().is_empty() {
        bail!("Flow id must not be empty");
    }
    let text = approval_text(text, file)?;

    let gateway = webhook_gateway(config)?;
    gateway
        .approve_job(&flow_id, &text)
        .await
        .map_err(|source| FlowError::ApprovalFailed {
            flow_id: flow_id.to_string(),
            source,
        })?;

    println!("{} Post for flow {} approved", CHECK, flow_id);
    Ok(())
}

fn approval_text(text: Option<&str>, file: Option<&Path>) -> Result<String> {
    let text = match (text, file) {
        (Some(text), _) => text.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read post text from {}", path.display()))?,
        (None, None) => bail!("Provide the post text with --text or --file"),
    };
    let text = text.trim_end().to_string();
    if text.trim().is_empty() {
        bail!("Post text must not be empty");
    }
    Ok(text)
}
