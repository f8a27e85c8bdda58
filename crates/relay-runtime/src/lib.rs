//! Relay Runtime - process bootstrap for the Relay dispatch framework.
//!
//! This crate provides:
//! - Layered configuration (`relay.toml`, profiles, `RELAY_*` variables)
//! - Logging setup on `tracing-subscriber`
//! - The update loop ([`RelayRuntime`]) pulling from an [`UpdateSource`]
//!
//! ```ignore
//! use relay_runtime::RelayRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, rx) = tokio::sync::mpsc::channel(64);
//!     spawn_poller(tx);
//!
//!     RelayRuntime::builder()
//!         .plugin(echo_plugin())
//!         .transport(transport)
//!         .build()?
//!         .run(rx)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, RelayConfig, RuntimeConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RelayRuntime, RuntimeBuilder, UpdateSource};

// Re-export tracing for user convenience
pub use tracing;

/// Prelude for common imports.
pub mod prelude {
    pub use super::config::{ConfigLoader, RelayConfig};
    pub use super::logging::LoggingBuilder;
    pub use super::runtime::{RelayRuntime, RuntimeBuilder, UpdateSource};
    pub use tracing::{debug, error, info, trace, warn};
}
