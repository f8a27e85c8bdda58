//! # Relay Core
//!
//! The fundamental building blocks of the Relay dispatch framework.
//!
//! - **Updates**: the inbound model handed over by the update source
//!   ([`Update`], [`Message`], [`Attachment`])
//! - **Handlers**: callbacks with ordering metadata ([`Handler`]) and the
//!   continuation signal they return ([`Flow`])
//! - **Environments**: per-update mutable context with parent/child scoping
//!   and reply capability ([`Environment`])
//! - **Transport**: the outbound boundary environments delegate to
//!   ([`Transport`])
//!
//! Routers, plugins and the engine live in `relay-framework`.
//!
//! ```text
//! ┌──────────────┐     ┌────────┐     ┌─────────┐      ┌─────────────┐
//! │ UpdateSource │────▶│ Engine │────▶│ Handler │─────▶│ Environment │──▶ Transport
//! └──────────────┘     └────────┘     └─────────┘      └─────────────┘
//! ```

pub mod environment;
pub mod error;
pub mod flow;
pub mod handler;
pub mod testing;
pub mod transport;
pub mod update;

pub use environment::{DEFAULT_CHUNK_SIZE, Environment, UploadError, split_chunks};
pub use error::{BoxError, HandlerError, HandlerResult, TransportError, TransportResult};
pub use flow::{Flow, IntoFlow};
pub use handler::{BoxedCallback, ErasedCallback, Handler, into_callback};
pub use transport::{
    FileSource, FileUpload, SendOptions, Transport, UploadKind, UploadTarget,
};
pub use update::{Attachment, Message, Update};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        Attachment, Environment, Flow, Handler, Message, SendOptions, Transport, Update,
    };
}
