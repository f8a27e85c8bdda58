//! Error types for the Relay framework.

use relay_core::BoxError;
use thiserror::Error;

use crate::router::RouterKind;

/// Errors raised while building or combining routers.
///
/// These surface at plugin registration or engine assembly time, never during
/// dispatch.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The two routers are not of exactly the same kind.
    #[error("cannot merge a '{right}' router into a '{left}' router")]
    Incompatible {
        /// Kind of the receiving router.
        left: RouterKind,
        /// Kind of the router being merged in.
        right: RouterKind,
    },

    /// The routers are of the same kind but have different priorities.
    #[error("cannot merge '{kind}' routers with priorities {left} and {right}")]
    PriorityMismatch {
        /// Shared router kind.
        kind: RouterKind,
        /// Priority of the receiving router.
        left: i32,
        /// Priority of the router being merged in.
        right: i32,
    },

    /// A regular expression failed to compile.
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// The discriminator does not fit this router.
    #[error("'{kind}' router does not accept {key} keys")]
    UnsupportedKey {
        /// Router kind.
        kind: RouterKind,
        /// Description of the rejected key.
        key: &'static str,
    },
}

/// Errors raised by the [`Engine`](crate::Engine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Plugin routers could not be combined.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// A startup hook failed; the engine did not start.
    #[error("startup hook of plugin '{plugin}' failed: {source}")]
    Startup {
        /// Name of the failing plugin.
        plugin: String,
        /// The hook's error.
        #[source]
        source: BoxError,
    },
}

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
