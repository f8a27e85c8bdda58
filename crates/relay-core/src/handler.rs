//! Handler system for the Relay framework.
//!
//! A [`Handler`] is the atomic unit of dispatch: a shared callback plus the
//! ordering metadata routers sort by. Callbacks are plain async functions or
//! closures taking the update and the environment:
//!
//! ```rust,ignore
//! use relay_core::{Environment, Flow, Handler, Update};
//! use std::sync::Arc;
//!
//! async fn greet(update: Arc<Update>, env: Arc<Environment>) -> Flow {
//!     env.reply("hello", Default::default()).await;
//!     Flow::Stop
//! }
//!
//! let handler = Handler::new(greet).priority(10);
//! ```
//!
//! The return type can be anything implementing [`IntoFlow`]: `()`, [`Flow`],
//! `Option<Flow>` or a `Result` of those.

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::environment::Environment;
use crate::error::{HandlerError, HandlerResult};
use crate::flow::IntoFlow;
use crate::update::Update;

// ============================================================================
// Callback erasure
// ============================================================================

/// Type-erased callback trait for dynamic dispatch.
pub trait ErasedCallback: Send + Sync {
    /// Starts the callback for one update.
    fn call(&self, update: Arc<Update>, env: Arc<Environment>) -> BoxFuture<'static, HandlerResult>;
}

/// A type-erased callback that can be stored in collections.
pub type BoxedCallback = Arc<dyn ErasedCallback>;

/// Wrapper turning an async function into an [`ErasedCallback`].
struct CallbackFn<F> {
    f: F,
}

impl<F, Fut, R> ErasedCallback for CallbackFn<F>
where
    F: Fn(Arc<Update>, Arc<Environment>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoFlow + 'static,
{
    fn call(&self, update: Arc<Update>, env: Arc<Environment>) -> BoxFuture<'static, HandlerResult> {
        let fut = (self.f)(update, env);
        Box::pin(async move { fut.await.into_flow() })
    }
}

/// Converts an async function into a boxed callback.
pub fn into_callback<F, Fut, R>(f: F) -> BoxedCallback
where
    F: Fn(Arc<Update>, Arc<Environment>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoFlow + 'static,
{
    Arc::new(CallbackFn { f })
}

// ============================================================================
// Handler
// ============================================================================

/// A callback plus the metadata that decides where it runs.
///
/// Handlers are ordered by `(early desc, priority desc)`; registration order
/// breaks ties because routers insert stably. Cloning is cheap and clones
/// share identity (see [`Handler::ptr_eq`]).
#[derive(Clone)]
pub struct Handler {
    callback: BoxedCallback,
    name: &'static str,
    priority: i32,
    early: bool,
    scope: usize,
}

impl Handler {
    /// Creates a handler with priority 0 that is not early.
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Arc<Update>, Arc<Environment>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoFlow + 'static,
    {
        Self::from_boxed(into_callback(f), std::any::type_name::<F>())
    }

    /// Creates a handler from an already boxed callback.
    pub fn from_boxed(callback: BoxedCallback, name: &'static str) -> Self {
        Self {
            callback,
            name,
            priority: 0,
            early: false,
            scope: 0,
        }
    }

    /// Sets the priority. Higher runs first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the handler as early: it runs before every late handler of the
    /// same router, whatever their priorities.
    pub fn early(mut self, early: bool) -> Self {
        self.early = early;
        self
    }

    /// Returns the priority.
    pub fn get_priority(&self) -> i32 {
        self.priority
    }

    /// Returns the early flag.
    pub fn is_early(&self) -> bool {
        self.early
    }

    /// Type name of the callback, for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Index of the plugin that owns this handler inside an engine.
    pub fn scope(&self) -> usize {
        self.scope
    }

    /// Returns a clone sharing the callback, tagged with another scope.
    #[doc(hidden)]
    pub fn with_scope(&self, scope: usize) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    /// Returns `true` when both handlers share the same callback.
    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }

    /// Dispatch order between two handlers. `Less` means `self` runs first.
    pub fn cmp_precedence(&self, other: &Handler) -> Ordering {
        other
            .early
            .cmp(&self.early)
            .then_with(|| other.priority.cmp(&self.priority))
    }

    /// Runs the callback, converting panics into [`HandlerError::Panicked`].
    pub async fn invoke(&self, update: Arc<Update>, env: Arc<Environment>) -> HandlerResult {
        let started =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.callback.call(update, env)));
        let fut = match started {
            Ok(fut) => fut,
            Err(payload) => return Err(HandlerError::from_panic(payload)),
        };
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(HandlerError::from_panic(payload)),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("early", &self.early)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Inserts `handler` after every handler that precedes or ties with it.
pub fn insert_sorted(handlers: &mut Vec<Handler>, handler: Handler) {
    let at = handlers.partition_point(|h| h.cmp_precedence(&handler) != Ordering::Greater);
    handlers.insert(at, handler);
}

/// Stable re-sort after concatenation.
pub fn sort_handlers(handlers: &mut [Handler]) {
    handlers.sort_by(Handler::cmp_precedence);
}
