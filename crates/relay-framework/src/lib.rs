//! # Relay Framework
//!
//! Routing and plugin composition on top of `relay-core`.
//!
//! This layer provides:
//! - The router family ([`ListRouter`], [`MapRouter`], [`AnyMessageRouter`],
//!   [`ShapeMatchRouter`]) and their merge protocol
//! - [`Plugin`]: named bundles of routers with lifecycle hooks, filled through
//!   `on_*` registration builders
//! - [`Engine`]: merges every plugin's routers into one execution plan and
//!   dispatches updates through it
//!
//! Update retrieval and process bootstrap live in `relay-runtime`.

pub mod engine;
pub mod error;
pub mod plugin;
pub mod router;

pub use engine::Engine;
pub use error::{EngineError, EngineResult, RouterError, RouterResult};
pub use plugin::{DisposeHook, IntoHookResult, Plugin, Registration, StartupHook};
pub use router::{
    AnyMessageRouter, ListRouter, MapRouter, MatchMode, Matched, RouteKey, Router,
    RouterKind, Selection, ShapeMatchRouter, run_chain,
};
