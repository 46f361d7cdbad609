/// Crate version reported on /health.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
