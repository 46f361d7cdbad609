#[tokio::main]
async fn main() -> anyhow::Result<()> {
    proxyfleet_console::init_tracing();
    proxyfleet_console::run().await
}
