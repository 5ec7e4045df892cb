//! Server module for exposing mounted resources over HTTP
//!
//! This module provides a `ServerBuilder` that registers, per mount:
//! - list, search and single read routes
//! - create, update, patch and destroy write routes
//! - health routes shared by the whole server

pub mod builder;
pub mod exposure;
pub mod host;
pub mod registry;

pub use builder::{Mount, ServerBuilder};
pub use exposure::RestExposure;
pub use host::ServerHost;
pub use registry::ResourceRegistry;

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber filtered by `RUST_LOG`
///
/// Falls back to `info` when `RUST_LOG` is unset or invalid. Calling it twice
/// is harmless; the second subscriber is ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}
