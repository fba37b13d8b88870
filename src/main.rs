use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use draftflow::config::{CliOverrides, Config};
use draftflow::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "draftflow")]
#[command(version, about = "Generate LinkedIn posts and follow their drafts as they are written")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to draftflow.toml. Defaults to ./draftflow.toml, then the user config directory
    #[arg(long, global = true, env = "DRAFTFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request a new post and follow it until text and image are in
    Generate {
        /// Subject of the post
        #[arg(short, long, required_unless_present = "suggestion")]
        topic: Option<String>,

        /// Who the post is written for
        #[arg(short, long, required_unless_present = "suggestion")]
        audience: Option<String>,

        /// Take topic and audience from a suggested topic (see `draftflow topics`)
        #[arg(short, long)]
        suggestion: Option<String>,

        /// Approve the generated post without prompting
        #[arg(long)]
        yes: bool,

        #[command(flatten)]
        watch: WatchFlags,
    },
    /// Follow a flow that was started elsewhere and print its draft
    Watch {
        flow_id: String,

        #[command(flatten)]
        watch: WatchFlags,
    },
    /// Approve a finished post by flow id
    Approve {
        flow_id: String,

        /// Final post text
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// Read the final post text from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List suggested topics
    Topics {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// View, validate or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

/// Flags shared by commands that follow a flow.
#[derive(clap::Args, Clone, Debug)]
pub struct WatchFlags {
    /// Poll only; do not subscribe to realtime changes
    #[arg(long)]
    pub no_realtime: bool,

    /// Poll period in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Stop waiting for the image after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print the final draft as JSON and skip prompts
    #[arg(long)]
    pub json: bool,
}

impl WatchFlags {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            no_realtime: self.no_realtime,
            poll_interval_ms: self.poll_interval_ms,
            wait_timeout_secs: self.timeout,
        }
    }
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Create a default draftflow.toml
    Init {
        /// Create it in the user config directory instead of the current one
        #[arg(long)]
        global: bool,
    },
}

fn load_config(cli: &Cli, overrides: &CliOverrides) -> Result<Config> {
    let config = Config::load(cli.config.as_deref())?.with_overrides(overrides);
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format)?;

    match &cli.command {
        Commands::Generate {
            topic,
            audience,
            suggestion,
            yes,
            watch,
        } => {
            let config = load_config(&cli, &watch.overrides())?;
            let args = cmd::GenerateArgs {
                topic: topic.clone(),
                audience: audience.clone(),
                suggestion: suggestion.clone(),
                yes: *yes,
                json: watch.json,
            };
            cmd::cmd_generate(&config, args, cli.verbose).await?;
        }
        Commands::Watch { flow_id, watch } => {
            let config = load_config(&cli, &watch.overrides())?;
            let args = cmd::WatchArgs {
                flow_id: flow_id.clone(),
                json: watch.json,
            };
            cmd::cmd_watch(&config, args, cli.verbose).await?;
        }
        Commands::Approve {
            flow_id,
            text,
            file,
        } => {
            let config = load_config(&cli, &CliOverrides::default())?;
            cmd::cmd_approve(&config, flow_id, text.as_deref(), file.as_deref()).await?;
        }
        Commands::Topics { json } => {
            let config = load_config(&cli, &CliOverrides::default())?;
            cmd::cmd_topics(&config, *json).await?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(cli.config.as_deref(), command.clone())?;
        }
    }

    Ok(())
}
