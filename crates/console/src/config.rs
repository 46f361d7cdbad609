use serde::{Deserialize, Deserializer};

pub const ENV_PREFIX: &str = "PROXYFLEET_CONSOLE";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub operator: OperatorAuthConfig,
    pub tokens: TokenConfig,
    pub channel: ChannelConfig,
    pub push: PushConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL agents use to reach the console (install commands and the
    /// channel endpoint are derived from it).
    pub advertised_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorAuthConfig {
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub tokens: Vec<String>,
    pub header_name: String,
}

fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(value) => Ok(value.split(',').map(|s| s.to_string()).collect()),
        StringOrVec::Vec(values) => Ok(values),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub pepper: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Interval between console-sent heartbeats.
    pub heartbeat_interval_secs: u64,
    /// Missing a heartbeat ack for this long is a transport failure.
    pub heartbeat_grace_secs: u64,
    /// The handshake must arrive within this window after the upgrade.
    pub handshake_timeout_secs: u64,
    /// Outgoing message buffer per agent session.
    pub outbox_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Interval between applied-version polls while a push is pending.
    pub poll_interval_ms: u64,
    /// Poll attempts before a pending push times out.
    pub poll_max_attempts: u32,
    /// How long a queued push waits for a disconnected agent to return.
    pub queue_wait_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub push_body_bytes: u64,
    pub max_mutations_per_push: usize,
    pub max_field_len: usize,
}

impl ChannelConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("channel.heartbeat_interval_secs must be > 0");
        }
        if self.heartbeat_grace_secs <= self.heartbeat_interval_secs {
            anyhow::bail!("channel.heartbeat_grace_secs must exceed the heartbeat interval");
        }
        if self.handshake_timeout_secs == 0 {
            anyhow::bail!("channel.handshake_timeout_secs must be > 0");
        }
        if self.outbox_capacity == 0 {
            anyhow::bail!("channel.outbox_capacity must be > 0");
        }
        Ok(())
    }
}

impl PushConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("push.poll_interval_ms must be > 0");
        }
        if self.poll_max_attempts == 0 {
            anyhow::bail!("push.poll_max_attempts must be > 0");
        }
        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            heartbeat_grace_secs: 75,
            handshake_timeout_secs: 10,
            outbox_capacity: 256,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            poll_max_attempts: 20,
            queue_wait_secs: 60,
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    let env = config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        // Keep try_parsing disabled so numeric token strings are not coerced.
        .try_parsing(false);

    let builder = config::Config::builder()
        .add_source(config::File::with_name("console").required(false))
        .add_source(env)
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("server.advertised_url", "http://127.0.0.1:8080")?
        .set_default("database.url", "sqlite://data/console.db")?
        .set_default("operator.tokens", vec!["dev-operator-token"])?
        .set_default("operator.header_name", "authorization")?
        .set_default("tokens.pepper", "dev-token-pepper")?
        .set_default("channel.heartbeat_interval_secs", 30u64)?
        .set_default("channel.heartbeat_grace_secs", 75u64)?
        .set_default("channel.handshake_timeout_secs", 10u64)?
        .set_default("channel.outbox_capacity", 256i64)?
        .set_default("push.poll_interval_ms", 500u64)?
        .set_default("push.poll_max_attempts", 20u32)?
        .set_default("push.queue_wait_secs", 60u64)?
        .set_default("limits.push_body_bytes", 256 * 1024u64)?
        .set_default("limits.max_mutations_per_push", 64i64)?
        .set_default("limits.max_field_len", 255)?;

    let cfg = builder.build()?;
    let mut app: AppConfig = cfg.try_deserialize()?;
    app.server.advertised_url = app.server.advertised_url.trim_end_matches('/').to_string();
    if app.server.advertised_url.is_empty() {
        anyhow::bail!("server.advertised_url cannot be empty");
    }
    app.channel.validate()?;
    app.push.validate()?;
    Ok(app)
}
