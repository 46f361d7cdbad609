pub mod app_state;
pub mod channel;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod http;
pub mod openapi;
pub mod persistence;
pub mod push;
pub mod routes;
pub mod schema;
pub mod services;
pub mod telemetry;
pub mod tokens;
pub mod validator;
pub mod version;

#[cfg(test)]
pub(crate) mod test_support;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderName;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app_state::{AppState, OperatorAuth};
use crate::channel::ChannelHub;
use crate::events::EventBus;
use crate::push::PushCoordinator;
use crate::schema::SchemaRegistry;

/// Builds the shared state from configuration and an initialized pool.
pub fn build_state(
    app_config: &config::AppConfig,
    db: persistence::Db,
    metrics_handle: PrometheusHandle,
) -> Result<AppState> {
    let operator_tokens: Vec<String> = app_config
        .operator
        .tokens
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if operator_tokens.is_empty() {
        return Err(anyhow::anyhow!(
            "PROXYFLEET_CONSOLE__OPERATOR__TOKENS cannot be empty"
        ));
    }
    let operator_header = app_config
        .operator
        .header_name
        .parse::<HeaderName>()
        .map_err(|err| anyhow::anyhow!("invalid operator header name: {}", err))?;

    let schemas = Arc::new(SchemaRegistry::builtin());
    let hub = ChannelHub::new();
    let events = EventBus::default();
    let coordinator = PushCoordinator::new(
        db.clone(),
        hub.clone(),
        events.clone(),
        schemas.clone(),
        app_config.push.clone(),
    );

    Ok(AppState {
        db,
        schemas,
        hub,
        coordinator,
        events,
        operator_auth: OperatorAuth {
            tokens: operator_tokens,
            header_name: operator_header,
        },
        token_pepper: app_config.tokens.pepper.clone(),
        advertised_url: app_config.server.advertised_url.clone(),
        channel: app_config.channel.clone(),
        limits: app_config.limits.clone(),
        metrics_handle,
    })
}

/// Serves the console on the given listener until `shutdown` completes.
pub async fn serve_with_shutdown<S>(
    state: AppState,
    listener: tokio::net::TcpListener,
    shutdown: S,
) -> Result<()>
where
    S: std::future::Future<Output = ()> + Send + 'static,
{
    let app = routes::build_router(state.clone()).with_state(state);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Boot the console: configuration, storage, state, HTTP server.
pub async fn run() -> Result<()> {
    let app_config = config::load()?;
    let metrics_handle = telemetry::init_metrics_recorder();

    let db = persistence::migrations::init_pool(&app_config.database.url).await?;
    persistence::migrations::run_migrations(&db).await?;

    let state = build_state(&app_config, db, metrics_handle)?;

    let addr: SocketAddr = format!("{}:{}", app_config.server.host, app_config.server.port)
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid listen address: {}", err))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, advertised_url = %app_config.server.advertised_url, "console listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    serve_with_shutdown(state, listener, async move {
        let _ = shutdown_rx.changed().await;
    })
    .await
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => stream.recv().await,
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                None
            }
        };
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        },
    }
}
