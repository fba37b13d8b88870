//! Integration tests for draftflow
//!
//! These drive the binary end to end, against local stand-ins for the
//! workflow webhooks and the record store where a backend is needed.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const BACKEND_VARS: &[&str] = &[
    "SUPABASE_URL",
    "VITE_SUPABASE_URL",
    "SUPABASE_ANON_KEY",
    "VITE_SUPABASE_ANON_KEY",
    "DRAFTFLOW_START_WEBHOOK",
    "DRAFTFLOW_APPROVE_WEBHOOK",
    "DRAFTFLOW_POLL_INTERVAL_MS",
    "DRAFTFLOW_CONFIG",
    "RUST_LOG",
];

/// Helper to create a draftflow Command isolated from the caller's environment
fn draftflow(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("draftflow");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join(".config"));
    for var in BACKEND_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_draftflow_help() {
        let dir = temp_dir();
        draftflow(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("generate"))
            .stdout(predicate::str::contains("watch"))
            .stdout(predicate::str::contains("approve"));
    }

    #[test]
    fn test_draftflow_version() {
        let dir = temp_dir();
        draftflow(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_generate_requires_topic_and_audience() {
        let dir = temp_dir();
        draftflow(&dir)
            .args(["generate", "--topic", "Sustainability"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--audience"));
    }

    #[test]
    fn test_generate_rejects_blank_topic() {
        let dir = temp_dir();
        draftflow(&dir)
            .args(["generate", "--topic", "  ", "--audience", "Planners"])
            .env("SUPABASE_URL", "http://127.0.0.1:9")
            .env("SUPABASE_ANON_KEY", "k")
            .assert()
            .failure()
            .stderr(predicate::str::contains("topic must not be empty"));
    }

    #[test]
    fn test_generate_without_store_credentials_fails() {
        let dir = temp_dir();
        draftflow(&dir)
            .args(["generate", "--topic", "Venues", "--audience", "Planners"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No store url configured"));
    }

    #[test]
    fn test_approve_requires_text_or_file() {
        let dir = temp_dir();
        draftflow(&dir)
            .args(["approve", "flow-1-abc"])
            .assert()
            .failure();
    }

    #[test]
    fn test_log_format_rejects_unknown_value() {
        let dir = temp_dir();
        draftflow(&dir)
            .args(["--log-format", "xml", "config", "show"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = temp_dir();
        draftflow(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No draftflow.toml found"))
            .stdout(predicate::str::contains("poll_interval_ms = 3000"))
            .stdout(predicate::str::contains("wait forever"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = temp_dir();
        draftflow(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created draftflow.toml"));

        let content = fs::read_to_string(dir.path().join("draftflow.toml")).unwrap();
        assert!(content.contains("[webhooks]"));
        assert!(content.contains("linkedin-start"));

        draftflow(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_warns_without_credentials() {
        let dir = temp_dir();
        draftflow(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Missing store url"));
    }

    #[test]
    fn test_config_validate_with_config() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("draftflow.toml"),
            r#"
[store]
url = "https://abc.supabase.co"
anon_key = "anon"

[watch]
poll_interval_ms = 2000
"#,
        )
        .unwrap();

        draftflow(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_env_overrides_file() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("draftflow.toml"),
            "[store]\nurl = \"https://file.supabase.co\"\n",
        )
        .unwrap();

        draftflow(&dir)
            .args(["config", "show"])
            .env("SUPABASE_URL", "https://env.supabase.co")
            .env("SUPABASE_ANON_KEY", "eyJhbGciOiJIUzI1NiJ9")
            .assert()
            .success()
            .stdout(predicate::str::contains("https://env.supabase.co"))
            .stdout(predicate::str::contains("eyJhbG***"))
            .stdout(predicate::str::contains("eyJhbGciOiJIUzI1NiJ9").not());
    }

    #[test]
    fn test_explicit_config_path() {
        let dir = temp_dir();
        let path = dir.path().join("custom").join("flow.toml");
        draftflow(&dir)
            .arg("--config")
            .arg(&path)
            .args(["config", "init"])
            .assert()
            .success();
        assert!(path.exists());

        draftflow(&dir)
            .arg("--config")
            .arg(dir.path().join("missing.toml"))
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Config file not found"));
    }

    #[test]
    fn test_invalid_poll_interval_env() {
        let dir = temp_dir();
        draftflow(&dir)
            .args(["config", "show"])
            .env("DRAFTFLOW_POLL_INTERVAL_MS", "often")
            .assert()
            .failure()
            .stderr(predicate::str::contains("DRAFTFLOW_POLL_INTERVAL_MS"));
    }
}

// =============================================================================
// End-to-end flows against local stand-ins
// =============================================================================

mod flows {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Query, State},
        routing::{get, post},
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Backend {
        started: Mutex<Vec<serde_json::Value>>,
        approved: Mutex<Vec<serde_json::Value>>,
    }

    type Shared = Arc<Backend>;

    async fn start(State(backend): State<Shared>, Json(body): Json<serde_json::Value>) {
        backend.started.lock().unwrap().push(body);
    }

    async fn approve(State(backend): State<Shared>, Json(body): Json<serde_json::Value>) {
        backend.approved.lock().unwrap().push(body);
    }

    /// Returns a finished row for any started flow and for `flow-watched`.
    async fn drafts(
        State(backend): State<Shared>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<serde_json::Value> {
        let requested = params
            .get("flow_id")
            .and_then(|v| v.strip_prefix("eq."))
            .unwrap_or_default()
            .to_string();
        let known = requested == "flow-watched"
            || backend
                .started
                .lock()
                .unwrap()
                .iter()
                .any(|b| b["flowId"] == requested.as_str());
        if known {
            Json(serde_json::json!([{
                "text": "Green events start with the guest list.",
                "image_url": "http://images.local/post.png"
            }]))
        } else {
            Json(serde_json::json!([]))
        }
    }

    async fn topics() -> Json<serde_json::Value> {
        Json(serde_json::json!([
            {"id": 1, "topic": "Catering", "audience": "Hotels", "used": false},
            {"id": 2, "topic": "Venues", "audience": "Planners", "used": true}
        ]))
    }

    async fn serve() -> (String, Shared) {
        let backend: Shared = Arc::default();
        let app = Router::new()
            .route("/webhook/linkedin-start", post(start))
            .route("/webhook/linkedin-approve", post(approve))
            .route("/rest/v1/linkedin_drafts", get(drafts))
            .route("/rest/v1/suggested_topics", get(topics))
            .with_state(backend.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), backend)
    }

    fn backend_cmd(dir: &TempDir, base: &str) -> Command {
        let mut cmd = draftflow(dir);
        cmd.env("SUPABASE_URL", base)
            .env("SUPABASE_ANON_KEY", "anon")
            .env("DRAFTFLOW_START_WEBHOOK", format!("{}/webhook/linkedin-start", base))
            .env("DRAFTFLOW_APPROVE_WEBHOOK", format!("{}/webhook/linkedin-approve", base))
            .timeout(std::time::Duration::from_secs(30));
        cmd
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_and_approve() {
        let (base, backend) = serve().await;
        let dir = temp_dir();
        let mut cmd = backend_cmd(&dir, &base);
        cmd.args([
            "generate",
            "--topic",
            "Sustainability",
            "--audience",
            "Event planners",
            "--yes",
            "--no-realtime",
            "--poll-interval-ms",
            "100",
        ]);

        let assert = tokio::task::spawn_blocking(move || cmd.assert())
            .await
            .unwrap();
        assert
            .success()
            .stdout(predicate::str::contains("Green events start with the guest list."))
            .stdout(predicate::str::contains("Post approved"));

        let started = backend.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0]["topic"], "Sustainability");
        assert_eq!(started[0]["audience"], "Event planners");
        let flow_id = started[0]["flowId"].as_str().unwrap().to_string();
        assert!(flow_id.starts_with("flow-"));

        let approved = backend.approved.lock().unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0]["flowId"], flow_id.as_str());
        assert_eq!(approved[0]["text"], "Green events start with the guest list.");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generate_from_suggestion_as_json() {
        let (base, backend) = serve().await;
        let dir = temp_dir();
        let mut cmd = backend_cmd(&dir, &base);
        cmd.args([
            "generate",
            "--suggestion",
            "1",
            "--json",
            "--no-realtime",
            "--poll-interval-ms",
            "100",
        ]);

        let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
            .await
            .unwrap();
        assert!(output.status.success());
        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["phase"], "ready");
        assert_eq!(report["progress"], 100);
        assert_eq!(report["image_url"], "http://images.local/post.png");

        assert_eq!(backend.started.lock().unwrap()[0]["topic"], "Catering");
        // --json never approves.
        assert!(backend.approved.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_used_suggestion_is_rejected() {
        let (base, backend) = serve().await;
        let dir = temp_dir();
        let mut cmd = backend_cmd(&dir, &base);
        cmd.args(["generate", "--suggestion", "2", "--no-realtime"]);

        let assert = tokio::task::spawn_blocking(move || cmd.assert())
            .await
            .unwrap();
        assert
            .failure()
            .stderr(predicate::str::contains("already used"));
        assert!(backend.started.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_existing_flow() {
        let (base, backend) = serve().await;
        let dir = temp_dir();
        let mut cmd = backend_cmd(&dir, &base);
        cmd.args([
            "watch",
            "flow-watched",
            "--json",
            "--no-realtime",
            "--poll-interval-ms",
            "100",
        ]);

        let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
            .await
            .unwrap();
        assert!(output.status.success());
        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["flow_id"], "flow-watched");
        assert_eq!(report["text"], "Green events start with the guest list.");
        assert!(backend.started.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_times_out_without_row() {
        let (base, _backend) = serve().await;
        let dir = temp_dir();
        let mut cmd = backend_cmd(&dir, &base);
        cmd.args([
            "watch",
            "flow-never-written",
            "--json",
            "--no-realtime",
            "--poll-interval-ms",
            "100",
            "--timeout",
            "1",
        ]);

        let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
            .await
            .unwrap();
        assert!(output.status.success());
        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["phase"], "timed_out");
        assert!(report["text"].is_null());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_approve_from_file() {
        let (base, backend) = serve().await;
        let dir = temp_dir();
        let post = dir.path().join("post.txt");
        fs::write(&post, "Final words\n").unwrap();

        let mut cmd = backend_cmd(&dir, &base);
        cmd.args(["approve", "flow-7-abcdefg", "--file"]).arg(&post);
        let assert = tokio::task::spawn_blocking(move || cmd.assert())
            .await
            .unwrap();
        assert.success().stdout(predicate::str::contains("approved"));

        let approved = backend.approved.lock().unwrap();
        assert_eq!(
            approved[0],
            serde_json::json!({"flowId": "flow-7-abcdefg", "text": "Final words"})
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_topics_lists_suggestions() {
        let (base, _backend) = serve().await;
        let dir = temp_dir();
        let mut cmd = backend_cmd(&dir, &base);
        cmd.args(["topics", "--json"]);
        let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
            .await
            .unwrap();
        assert!(output.status.success());
        let topics: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(topics[0]["id"], "1");
        assert_eq!(topics[1]["used"], true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_start_is_reported() {
        let dir = temp_dir();
        let mut cmd = draftflow(&dir);
        cmd.env("SUPABASE_URL", "http://127.0.0.1:9")
            .env("SUPABASE_ANON_KEY", "anon")
            .env("DRAFTFLOW_START_WEBHOOK", "http://127.0.0.1:9/start")
            .args(["generate", "-t", "Venues", "-a", "Planners", "--no-realtime"]);
        let assert = tokio::task::spawn_blocking(move || cmd.assert())
            .await
            .unwrap();
        assert
            .failure()
            .stderr(predicate::str::contains("Post generation was not started"));
    }
}
