//! Agent-against-console loop test: a real agent process (minus the
//! binary wrapper) connects to a real in-process console, receives a push,
//! applies it, and the console observes the applied version.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

use proxyfleet_agent::{config as agent_config, runner, state};
use proxyfleet_console::config::{
    AppConfig as ConsoleConfig, ChannelConfig, DatabaseConfig, LimitsConfig, OperatorAuthConfig,
    PushConfig, ServerConfig, TokenConfig,
};
use proxyfleet_console::persistence::migrations;
use proxyfleet_console::{build_state, serve_with_shutdown, telemetry};

const OPERATOR_TOKEN: &str = "test-operator-token";

async fn start_console() -> (SocketAddr, watch::Sender<bool>) {
    let app_config = ConsoleConfig {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            advertised_url: "http://127.0.0.1:8080".into(),
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".into(),
        },
        operator: OperatorAuthConfig {
            tokens: vec![OPERATOR_TOKEN.into()],
            header_name: "authorization".into(),
        },
        tokens: TokenConfig {
            pepper: "test-pepper".into(),
        },
        channel: ChannelConfig {
            heartbeat_interval_secs: 1,
            heartbeat_grace_secs: 3,
            handshake_timeout_secs: 2,
            outbox_capacity: 64,
        },
        push: PushConfig {
            poll_interval_ms: 20,
            poll_max_attempts: 50,
            queue_wait_secs: 5,
        },
        limits: LimitsConfig {
            push_body_bytes: 256 * 1024,
            max_mutations_per_push: 64,
            max_field_len: 255,
        },
    };

    let db = migrations::init_pool(&app_config.database.url)
        .await
        .expect("pool init");
    migrations::run_migrations(&db).await.expect("migrations");
    let state = build_state(&app_config, db, telemetry::init_metrics_recorder()).expect("state");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        serve_with_shutdown(state, listener, async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
        .expect("server");
    });

    (addr, shutdown_tx)
}

#[tokio::test]
async fn agent_applies_pushed_config_and_console_confirms() {
    let (addr, _console_shutdown) = start_console().await;
    let client = reqwest::Client::new();

    // Register the agent and capture its one-time credential.
    let created: serde_json::Value = client
        .post(format!("http://{addr}/api/v1/agents"))
        .bearer_auth(OPERATOR_TOKEN)
        .json(&json!({"name": "edge-1"}))
        .send()
        .await
        .expect("create agent")
        .json()
        .await
        .expect("create agent body");
    let agent_id: Uuid = serde_json::from_value(created["agent_id"].clone()).expect("agent id");
    let credential = created["credential"].as_str().expect("credential").to_string();

    let state_dir = tempfile::tempdir().expect("tempdir");
    let cfg = agent_config::AppConfig {
        console_url: format!("http://{addr}"),
        agent_id,
        credential,
        state_dir: state_dir.path().to_str().expect("utf8 path").into(),
        reconnect_delay_secs: 1,
        reconnect_max_attempts: 10,
        handshake_timeout_secs: 2,
        allow_insecure_http: true,
        metrics_host: "127.0.0.1".into(),
        metrics_port: 0,
    };
    let handle = runner::start_agent(
        cfg.clone(),
        runner::AgentOptions {
            init_tracing: false,
            serve_metrics: false,
            metrics_handle: Some(telemetry::init_metrics_recorder()),
        },
    )
    .await
    .expect("start agent");

    // Wait for the channel to come up.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let agent: serde_json::Value = client
            .get(format!("http://{addr}/api/v1/agents/{agent_id}"))
            .bearer_auth(OPERATOR_TOKEN)
            .send()
            .await
            .expect("get agent")
            .json()
            .await
            .expect("agent body");
        if agent["connection_state"] == "connected" {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "agent never connected: {agent}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Push an inbound and wait for confirmation.
    let accepted: serde_json::Value = client
        .post(format!("http://{addr}/api/v1/agents/{agent_id}/pushes"))
        .bearer_auth(OPERATOR_TOKEN)
        .json(&json!({"mutations": [{
            "op": "create",
            "kind": "inbound",
            "tag": "socks-in",
            "document": {
                "tag": "socks-in",
                "protocol": "socks",
                "port": 1080,
                "settings": {"auth": "noauth", "udp": false},
            },
        }]}))
        .send()
        .await
        .expect("push")
        .json()
        .await
        .expect("push body");
    assert_eq!(accepted["target_version"], 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status: serde_json::Value = client
            .get(format!(
                "http://{addr}/api/v1/agents/{agent_id}/pushes/status"
            ))
            .bearer_auth(OPERATOR_TOKEN)
            .send()
            .await
            .expect("status")
            .json()
            .await
            .expect("status body");
        if status["last_resolved"]["state"] == "confirmed" {
            assert_eq!(status["applied_version"], 1);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "push never confirmed: {status}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    handle.shutdown().await.expect("agent shutdown");

    // The applied state survived to disk.
    let persisted = state::load_persisted(cfg.state_dir.as_str()).expect("state file");
    assert_eq!(persisted.applied_version, 1);
    assert_eq!(
        persisted.documents["inbound"]["socks-in"]["port"],
        json!(1080)
    );
}
