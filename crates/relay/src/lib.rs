//! # Relay
//!
//! An update dispatch framework for chat bots.
//!
//! ## Overview
//!
//! Relay takes updates (messages or raw platform events) and runs them
//! through the handlers that plugins registered for them. Plugins group
//! handlers by trigger kind into routers; the engine merges every plugin's
//! routers into one execution plan and walks it for each update until a
//! handler stops the chain.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────┐     ┌─────────────────────────────────────┐
//! │ UpdateSource │────▶│ Engine │────▶│ Router (Special, prio 0)            │
//! │  (runtime)   │     │        │────▶│ Router (Text, prio 0)  ──▶ handlers │──▶ Environment ──▶ Transport
//! └──────────────┘     └────────┘────▶│ Router ...                          │
//!                                     └─────────────────────────────────────┘
//! ```
//!
//! - **Runtime**: loads configuration, sets up logging, pulls updates
//! - **Engine**: merged routers plus the plugins' lifecycle hooks
//! - **Routers**: select the handlers that apply to an update
//! - **Handlers**: user async functions returning [`Flow`](core::Flow)
//! - **Environment**: per-update metadata and the reply channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relay::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut echo = Plugin::new("echo");
//!     echo.on_startswith_text(["echo"]).handle(|_update, env| async move {
//!         let body = env.get_meta("body").and_then(|v| v.as_str().map(str::to_owned));
//!         env.reply(&body.unwrap_or_default(), SendOptions::default()).await;
//!         Flow::Stop
//!     });
//!
//!     RelayRuntime::builder()
//!         .plugin(echo)
//!         .transport(my_transport())
//!         .build()?
//!         .run(my_update_source())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines

pub use relay_core as core;
pub use relay_framework as framework;
pub use relay_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use relay::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use relay_runtime::{RelayRuntime, RuntimeBuilder, UpdateSource};

    // Plugins and the engine
    pub use relay_framework::{Engine, Plugin, RouterKind};

    // Handler side
    pub use relay_core::{
        Attachment, Environment, Flow, Handler, Message, SendOptions, Transport, Update,
    };
}
