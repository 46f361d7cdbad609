use proxyfleet_agent::{config, runner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    let handle = runner::start_agent(cfg, runner::AgentOptions::default()).await?;

    runner::wait_for_shutdown_signal().await;
    handle.shutdown().await
}
