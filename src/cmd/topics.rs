//! Suggested topics (`draftflow topics`).

use anyhow::{Context, Result, bail};
use console::style;

use draftflow::config::Config;
use draftflow::store::{Suggestion, TopicStore};
use draftflow::ui::{preview_width, render_topics};

use super::rest_store;

pub async fn cmd_topics(config: &Config, json: bool) -> Result<()> {
    let store = rest_store(config)?;
    let topics = store
        .list_topics()
        .await
        .context("Failed to load suggested topics")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&topics).context("Failed to serialize topics")?
        );
        return Ok(());
    }

    println!();
    println!("Suggested topics");
    println!("================");
    println!();
    print!("{}", render_topics(&topics, preview_width()));
    println!();
    println!(
        "{}",
        style("Use one with: draftflow generate --suggestion <id>").dim()
    );
    Ok(())
}

/// Look up an unused suggestion by id.
pub async fn pick_suggestion(config: &Config, id: &str) -> Result<Suggestion> {
    let store = rest_store(config)?;
    let topics = store
        .list_topics()
        .await
        .context("Failed to load suggested topics")?;
    select_unused(topics, id)
}

fn select_unused(topics: Vec<Suggestion>, id: &str) -> Result<Suggestion> {
    let Some(suggestion) = topics.into_iter().find(|t| t.id == id.trim()) else {
        bail!("No suggested topic with id '{}'", id);
    };
    if suggestion.used {
        bail!(
            "Suggested topic '{}' ({}) was already used",
            suggestion.topic,
            suggestion.id
        );
    }
    Ok(suggestion)
}
