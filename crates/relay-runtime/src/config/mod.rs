//! Configuration for the Relay runtime.
//!
//! Settings are layered with figment from defaults, `relay.toml` and `RELAY_*`
//! environment variables. See [`ConfigLoader`] for the lookup rules.

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LoggingConfig, RelayConfig, RuntimeConfig, SpanEventConfig,
};
