//! Runtime error types.

use thiserror::Error;

use relay_framework::EngineError;

use crate::config::ConfigError;

/// Errors that can occur while building or running a [`RelayRuntime`](crate::RelayRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Router merge or a startup hook failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The builder was not given a transport.
    #[error("No transport configured; call `RuntimeBuilder::transport` before `build`")]
    MissingTransport,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
