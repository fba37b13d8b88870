//! Layered configuration for draftflow.
//!
//! Values are resolved in order: built-in defaults, then `draftflow.toml`,
//! then environment variables (a `.env` file is loaded by the binary), then
//! CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! url = "https://xyzcompany.supabase.co"
//! anon_key = "public-anon-key"
//! drafts_table = "linkedin_drafts"
//! topics_table = "suggested_topics"
//! schema = "public"
//!
//! [webhooks]
//! start_url = "https://basemen.app.n8n.cloud/webhook/linkedin-start"
//! approve_url = "https://basemen.app.n8n.cloud/webhook/linkedin-approve"
//!
//! [watch]
//! poll_interval_ms = 3000
//! realtime = true
//! wait_timeout_secs = 600
//! request_timeout_secs = 30
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::realtime::RealtimeSettings;
use crate::session::SessionSettings;
use crate::store::{DEFAULT_DRAFTS_TABLE, DEFAULT_SCHEMA, DEFAULT_TOPICS_TABLE, StoreSettings};
use crate::webhook::{DEFAULT_APPROVE_WEBHOOK, DEFAULT_START_WEBHOOK};

pub const CONFIG_FILE_NAME: &str = "draftflow.toml";

const MIN_POLL_INTERVAL_MS: u64 = 500;
const MAX_POLL_INTERVAL_MS: u64 = 30_000;

/// Record store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Project URL, e.g. `https://xyz.supabase.co`
    #[serde(default)]
    pub url: Option<String>,
    /// Public anonymous key
    #[serde(default)]
    pub anon_key: Option<String>,
    #[serde(default = "default_drafts_table")]
    pub drafts_table: String,
    #[serde(default = "default_topics_table")]
    pub topics_table: String,
    #[serde(default = "default_schema")]
    pub schema: String,
}

fn default_drafts_table() -> String {
    DEFAULT_DRAFTS_TABLE.to_string()
}

fn default_topics_table() -> String {
    DEFAULT_TOPICS_TABLE.to_string()
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            drafts_table: default_drafts_table(),
            topics_table: default_topics_table(),
            schema: default_schema(),
        }
    }
}

/// Workflow webhook endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhooksSection {
    #[serde(default = "default_start_url")]
    pub start_url: String,
    #[serde(default = "default_approve_url")]
    pub approve_url: String,
}

fn default_start_url() -> String {
    DEFAULT_START_WEBHOOK.to_string()
}

fn default_approve_url() -> String {
    DEFAULT_APPROVE_WEBHOOK.to_string()
}

impl Default for WebhooksSection {
    fn default() -> Self {
        Self {
            start_url: default_start_url(),
            approve_url: default_approve_url(),
        }
    }
}

/// How a running flow is followed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Subscribe to the realtime feed in addition to polling
    #[serde(default = "default_realtime")]
    pub realtime: bool,
    /// Stop waiting for the image after this many seconds (unset: wait forever)
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
    /// Timeout of a single HTTP request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_realtime() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            realtime: default_realtime(),
            wait_timeout_secs: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Contents of `draftflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftflowToml {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub webhooks: WebhooksSection,
    #[serde(default)]
    pub watch: WatchSection,
}

impl DraftflowToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse draftflow.toml")
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize draftflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// The unprefixed names win over the `VITE_` ones so a shell export beats
    /// a frontend `.env`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| lookup(key))
                .find(|v| !v.trim().is_empty())
        };

        if let Some(url) = first(&["SUPABASE_URL", "VITE_SUPABASE_URL"]) {
            self.store.url = Some(url);
        }
        if let Some(key) = first(&["SUPABASE_ANON_KEY", "VITE_SUPABASE_ANON_KEY"]) {
            self.store.anon_key = Some(key);
        }
        if let Some(url) = first(&["DRAFTFLOW_START_WEBHOOK"]) {
            self.webhooks.start_url = url;
        }
        if let Some(url) = first(&["DRAFTFLOW_APPROVE_WEBHOOK"]) {
            self.webhooks.approve_url = url;
        }
        if let Some(ms) = first(&["DRAFTFLOW_POLL_INTERVAL_MS"]) {
            self.watch.poll_interval_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("DRAFTFLOW_POLL_INTERVAL_MS is not a number: '{}'", ms))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.store.url.is_none() {
            warnings.push(
                "Missing store url: set [store] url or SUPABASE_URL".to_string(),
            );
        }
        if self.store.anon_key.is_none() {
            warnings.push(
                "Missing store anon key: set [store] anon_key or SUPABASE_ANON_KEY".to_string(),
            );
        }
        if let Some(url) = &self.store.url
            && !is_http_url(url)
        {
            warnings.push(format!("Store url '{}' is not an http(s) URL", url));
        }

        for (name, url) in [
            ("start_url", &self.webhooks.start_url),
            ("approve_url", &self.webhooks.approve_url),
        ] {
            if !is_http_url(url) {
                warnings.push(format!("Webhook {} '{}' is not an http(s) URL", name, url));
            }
        }

        let interval = self.watch.poll_interval_ms;
        if interval < MIN_POLL_INTERVAL_MS {
            warnings.push(format!(
                "poll_interval_ms = {} is below {} ms and will hammer the store",
                interval, MIN_POLL_INTERVAL_MS
            ));
        } else if interval > MAX_POLL_INTERVAL_MS {
            warnings.push(format!(
                "poll_interval_ms = {} is above {} ms; updates will be slow without realtime",
                interval, MAX_POLL_INTERVAL_MS
            ));
        }

        if self.watch.wait_timeout_secs == Some(0) {
            warnings.push("wait_timeout_secs = 0 times out immediately".to_string());
        }

        warnings
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// `<config_dir>/draftflow/draftflow.toml`, if the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("draftflow").join(CONFIG_FILE_NAME))
}

/// Pick the config file: explicit path, then `./draftflow.toml`, then the user file.
///
/// An explicit path is returned even when it does not exist so `config init`
/// can create it; for the implicit locations only existing files count.
pub fn resolve_config_path(explicit: Option<&Path>, cwd: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = cwd.join(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    user_config_path().filter(|p| p.exists())
}

/// Flags that override the file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub no_realtime: bool,
    pub poll_interval_ms: Option<u64>,
    pub wait_timeout_secs: Option<u64>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub toml: DraftflowToml,
    /// File the values were read from, if any
    pub path: Option<PathBuf>,
}

impl Config {
    /// Resolve defaults → file → environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
        let path = resolve_config_path(explicit, &cwd);
        if let Some(path) = explicit
            && !path.exists()
        {
            bail!("Config file not found: {}", path.display());
        }

        let mut toml = DraftflowToml::load_or_default(path.as_deref())?;
        toml.apply_env()?;
        tracing::debug!(path = ?path, "configuration loaded");
        Ok(Self { toml, path })
    }

    pub fn from_toml(toml: DraftflowToml) -> Self {
        Self { toml, path: None }
    }

    /// Apply CLI flags on top of everything else.
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if overrides.no_realtime {
            self.toml.watch.realtime = false;
        }
        if let Some(ms) = overrides.poll_interval_ms {
            self.toml.watch.poll_interval_ms = ms;
        }
        if let Some(secs) = overrides.wait_timeout_secs {
            self.toml.watch.wait_timeout_secs = Some(secs);
        }
        self
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.watch.request_timeout_secs.max(1))
    }

    /// Store settings; fails when url or key is missing.
    pub fn store_settings(&self) -> Result<StoreSettings> {
        let (url, key) = self.store_credentials()?;
        let mut settings = StoreSettings::new(url, key);
        settings.schema = self.toml.store.schema.clone();
        settings.drafts_table = self.toml.store.drafts_table.clone();
        settings.topics_table = self.toml.store.topics_table.clone();
        settings.timeout = self.request_timeout();
        Ok(settings)
    }

    pub fn realtime_settings(&self) -> Result<RealtimeSettings> {
        let (url, key) = self.store_credentials()?;
        let mut settings = RealtimeSettings::new(url, key);
        settings.schema = self.toml.store.schema.clone();
        settings.table = self.toml.store.drafts_table.clone();
        Ok(settings)
    }

    pub fn session_settings(&self) -> SessionSettings {
        let watch = &self.toml.watch;
        SessionSettings {
            poll_interval: Duration::from_millis(watch.poll_interval_ms.max(1)),
            wait_timeout: watch.wait_timeout_secs.map(Duration::from_secs),
            realtime: watch.realtime,
        }
    }

    fn store_credentials(&self) -> Result<(String, String)> {
        let store = &self.toml.store;
        let url = store
            .url
            .clone()
            .context("No store url configured. Set [store] url in draftflow.toml or SUPABASE_URL")?;
        let key = store.anon_key.clone().context(
            "No store anon key configured. Set [store] anon_key in draftflow.toml or SUPABASE_ANON_KEY",
        )?;
        Ok((url, key))
    }
}
