//! Configuration view and validation commands (`draftflow config`).

use anyhow::{Context, Result};
use std::path::Path;

use draftflow::config::{CONFIG_FILE_NAME, Config, DraftflowToml, user_config_path};

use super::super::ConfigCommands;

/// Mask all but the first few characters of a secret.
fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(6).collect();
    if secret.chars().count() <= 6 {
        "***".to_string()
    } else {
        format!("{}***", visible)
    }
}

fn print_effective(toml: &DraftflowToml) {
    println!("[store]");
    match &toml.store.url {
        Some(url) => println!("  url = \"{}\"", url),
        None => println!("  url = (unset)"),
    }
    match &toml.store.anon_key {
        Some(key) => println!("  anon_key = \"{}\"", mask(key)),
        None => println!("  anon_key = (unset)"),
    }
    println!("  drafts_table = \"{}\"", toml.store.drafts_table);
    println!("  topics_table = \"{}\"", toml.store.topics_table);
    println!("  schema = \"{}\"", toml.store.schema);
    println!();

    println!("[webhooks]");
    println!("  start_url = \"{}\"", toml.webhooks.start_url);
    println!("  approve_url = \"{}\"", toml.webhooks.approve_url);
    println!();

    println!("[watch]");
    println!("  poll_interval_ms = {}", toml.watch.poll_interval_ms);
    println!("  realtime = {}", toml.watch.realtime);
    match toml.watch.wait_timeout_secs {
        Some(secs) => println!("  wait_timeout_secs = {}", secs),
        None => println!("  wait_timeout_secs = (wait forever)"),
    }
    println!("  request_timeout_secs = {}", toml.watch.request_timeout_secs);
    println!();
}

pub fn cmd_config(explicit: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Draftflow Configuration");
            println!("=======================");
            println!();

            let config = Config::load(explicit)?;
            match &config.path {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("No draftflow.toml found; using defaults"),
            }
            println!();
            println!("Effective values (with env overrides):");
            print_effective(&config.toml);

            if config.path.is_none() {
                println!("Run 'draftflow config init' to create a draftflow.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = Config::load(explicit)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init { global }) => {
            let path = match explicit {
                Some(path) => path.to_path_buf(),
                None if global => user_config_path()
                    .context("No user config directory on this platform")?,
                None => std::env::current_dir()
                    .context("Failed to get current directory")?
                    .join(CONFIG_FILE_NAME),
            };

            if path.exists() {
                println!("draftflow.toml already exists at {}", path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            DraftflowToml::default().save(&path)?;

            println!("Created draftflow.toml at {}", path.display());
            println!();
            println!("You can now customize:");
            println!("  - [store] url, anon_key (or set SUPABASE_URL / SUPABASE_ANON_KEY)");
            println!("  - [webhooks] start_url, approve_url");
            println!("  - [watch] poll_interval_ms, realtime, wait_timeout_secs");
            println!();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_hides_secret() {
        assert_eq!(mask("abc"), "***");
        assert_eq!(mask("eyJhbGciOiJIUzI1NiJ9"), "eyJhbG***");
    }
}
