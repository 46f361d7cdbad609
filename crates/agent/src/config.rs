use serde::Deserialize;
use uuid::Uuid;

pub const ENV_PREFIX: &str = "PROXYFLEET_AGENT";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Console base URL (http:// or https://).
    pub console_url: String,
    pub agent_id: Uuid,
    pub credential: String,
    /// Directory holding the persisted configuration state file.
    pub state_dir: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_secs: u64,
    /// Reconnect attempts before the agent gives up and stays disconnected
    /// until restarted.
    pub reconnect_max_attempts: u32,
    /// How long to wait for the console's handshake ack.
    pub handshake_timeout_secs: u64,
    pub allow_insecure_http: bool,
    pub metrics_host: String,
    pub metrics_port: u16,
}

pub fn load() -> anyhow::Result<AppConfig> {
    let env = config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        // Keep try_parsing disabled so the credential is never coerced.
        .try_parsing(false);

    let builder = config::Config::builder()
        .add_source(config::File::with_name("agent").required(false))
        .add_source(env)
        .set_default("console_url", "http://127.0.0.1:8080")?
        .set_default("state_dir", "data")?
        .set_default("reconnect_delay_secs", 3u64)?
        .set_default("reconnect_max_attempts", 10u32)?
        .set_default("handshake_timeout_secs", 10u64)?
        .set_default("allow_insecure_http", false)?
        .set_default("metrics_host", "127.0.0.1")?
        .set_default("metrics_port", 9465)?;

    let cfg = builder.build()?;
    let mut app: AppConfig = cfg.try_deserialize()?;
    app.console_url = app.console_url.trim_end_matches('/').to_string();
    if app.credential.trim().is_empty() {
        anyhow::bail!("credential cannot be empty");
    }
    if app.reconnect_delay_secs == 0 {
        anyhow::bail!("reconnect_delay_secs must be > 0");
    }
    validate_console_url(&app)?;
    Ok(app)
}

/// Rejects plaintext console URLs unless explicitly allowed.
pub fn validate_console_url(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.console_url.starts_with("https://") {
        return Ok(());
    }
    if cfg.console_url.starts_with("http://") {
        if cfg.allow_insecure_http {
            return Ok(());
        }
        anyhow::bail!(
            "insecure console URL not allowed; set allow_insecure_http=true to override"
        );
    }
    anyhow::bail!("console_url must start with http:// or https://");
}

/// The WebSocket endpoint derived from the console base URL.
pub fn channel_url(cfg: &AppConfig) -> String {
    let base = cfg.console_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/api/v1/channel")
}

#[cfg(test)]
pub(crate) fn base_config() -> AppConfig {
    AppConfig {
        console_url: "http://127.0.0.1:8080".into(),
        agent_id: Uuid::nil(),
        credential: "test-credential".into(),
        state_dir: "data".into(),
        reconnect_delay_secs: 1,
        reconnect_max_attempts: 2,
        handshake_timeout_secs: 2,
        allow_insecure_http: true,
        metrics_host: "127.0.0.1".into(),
        metrics_port: 0,
    }
}
