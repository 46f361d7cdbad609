//! Shared types for the proxyfleet workspace.
//!
//! Keep cross-crate DTOs and the console⇄agent wire protocol here to avoid duplication.

#![warn(missing_docs)]

/// Shared API DTOs for cross-crate use.
pub mod api;
/// The console⇄agent channel protocol.
pub mod proto;
