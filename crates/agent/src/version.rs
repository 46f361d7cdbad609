/// Crate version reported in the startup log.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
