use std::net::SocketAddr;

use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info};

use crate::{config, connection::connection_loop, state, telemetry, version};

/// Controls optional behaviours when starting the agent programmatically.
#[derive(Clone, Debug)]
pub struct AgentOptions {
    /// Initialize a tracing subscriber before starting the agent.
    pub init_tracing: bool,
    /// Start the dedicated `/metrics` HTTP server.
    pub serve_metrics: bool,
    /// Reuse an existing Prometheus recorder instead of installing a new one.
    pub metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            init_tracing: true,
            serve_metrics: true,
            metrics_handle: None,
        }
    }
}

/// Handle returned by [`start_agent`] to manage shutdown when embedded.
pub struct AgentHandle {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    /// Returns a cloneable receiver that fires when shutdown is requested.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Request a graceful shutdown; idempotent.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for all agent tasks to finish.
    pub async fn await_termination(self) -> anyhow::Result<()> {
        for handle in self.tasks {
            if let Err(join_err) = handle.await {
                if join_err.is_panic() {
                    error!(?join_err, "agent task panicked during shutdown");
                    anyhow::bail!("agent task panicked");
                }
            }
        }
        Ok(())
    }

    /// Request shutdown and block until all tasks have stopped.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.request_shutdown();
        self.await_termination().await
    }
}

/// Start the agent using the provided configuration and options.
pub async fn start_agent(
    cfg: config::AppConfig,
    mut options: AgentOptions,
) -> anyhow::Result<AgentHandle> {
    if options.init_tracing {
        telemetry::init_tracing();
    }

    config::validate_console_url(&cfg)?;

    let metrics_handle = match options.metrics_handle.take() {
        Some(handle) => telemetry::register_metrics_handle(handle),
        None => telemetry::init_metrics_recorder(),
    };
    let metrics_addr: SocketAddr = format!("{}:{}", cfg.metrics_host, cfg.metrics_port)
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid metrics bind address: {}", err))?;

    let state = state::new_state(cfg)?;

    {
        let guard = state.lock().await;
        info!(
            agent_id = %guard.cfg.agent_id,
            console = %guard.cfg.console_url,
            insecure_http = guard.cfg.allow_insecure_http,
            applied_version = guard.persisted.applied_version,
            version = version::VERSION,
            "agent starting"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    if options.serve_metrics {
        let metrics_handle = metrics_handle.clone();
        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let shutdown_fut = async move {
                if *shutdown.borrow() {
                    return;
                }
                let _ = shutdown.changed().await;
            };
            if let Err(err) =
                telemetry::serve_metrics_with_shutdown(metrics_handle, metrics_addr, shutdown_fut)
                    .await
            {
                error!(?err, "metrics server exited with error");
            }
        }));
    }

    let channel_state = state.clone();
    let channel_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(err) = connection_loop(channel_state, channel_shutdown).await {
            error!(?err, "channel loop terminated with error");
        }
    }));

    Ok(AgentHandle {
        shutdown_tx,
        shutdown_rx,
        tasks,
    })
}

/// Waits for Ctrl+C or SIGTERM.
pub async fn wait_for_shutdown_signal() {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_options_defaults() {
        let opts = AgentOptions::default();
        assert!(opts.init_tracing);
        assert!(opts.serve_metrics);
        assert!(opts.metrics_handle.is_none());
    }

    #[tokio::test]
    async fn agent_handle_request_shutdown_sets_signal() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = AgentHandle {
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        };

        handle.request_shutdown();
        assert!(*handle.shutdown_signal().borrow());
    }

    #[tokio::test]
    async fn agent_handle_reports_task_panics() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async {
            panic!("boom");
        });
        let handle = AgentHandle {
            shutdown_tx,
            shutdown_rx,
            tasks: vec![task],
        };

        let err = handle.await_termination().await.expect_err("panic");
        assert!(err.to_string().contains("panicked"));
    }
}
