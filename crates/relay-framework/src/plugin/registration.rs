use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use tracing::error;

use relay_core::handler::{BoxedCallback, ErasedCallback, into_callback};
use relay_core::{Environment, Flow, Handler, HandlerResult, IntoFlow, Update};

use super::core::Plugin;
use crate::router::{RouteKey, RouterKind};

// ─── Target ──────────────────────────────────────────────────────────────────

/// Where a registration lands inside its plugin.
pub(crate) struct Target {
    pub(crate) kind: RouterKind,
    /// Keys to register under; empty means the router's catch-all list (or
    /// the single list of unkeyed routers).
    pub(crate) keys: Vec<RouteKey>,
    /// Lower-cased substrings, one of which the text must contain.
    pub(crate) contains: Vec<String>,
}

impl Target {
    pub(crate) fn new(kind: RouterKind) -> Self {
        Self {
            kind,
            keys: Vec::new(),
            contains: Vec::new(),
        }
    }

    pub(crate) fn keys(mut self, keys: Vec<RouteKey>) -> Self {
        self.keys = keys;
        self
    }
}

// ─── Registration ────────────────────────────────────────────────────────────

/// Builder returned by the `Plugin::on_*` methods.
///
/// Nothing is registered until [`handle`](Self::handle) is called.
///
/// ```rust,ignore
/// plugin
///     .on_text(["ping"])
///     .priority(5)
///     .handle(|_update, env| async move {
///         env.reply("pong", SendOptions::default()).await;
///         Flow::Stop
///     });
/// ```
#[must_use = "a registration does nothing until `.handle(..)` is called"]
pub struct Registration<'p> {
    plugin: &'p mut Plugin,
    target: Target,
    priority: i32,
    early: bool,
}

impl<'p> Registration<'p> {
    pub(crate) fn new(plugin: &'p mut Plugin, target: Target) -> Self {
        Self {
            plugin,
            target,
            priority: 0,
            early: false,
        }
    }

    /// Sets the handler priority. Higher runs first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the handler as early.
    pub fn early(mut self, early: bool) -> Self {
        self.early = early;
        self
    }

    /// Registers `f` and returns the created handler.
    pub fn handle<F, Fut, R>(self, f: F) -> Handler
    where
        F: Fn(Arc<Update>, Arc<Environment>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoFlow + 'static,
    {
        let Self {
            plugin,
            target,
            priority,
            early,
        } = self;

        let mut callback = into_callback(f);
        if !target.contains.is_empty() {
            callback = Arc::new(ContainsText {
                needles: target.contains,
                inner: callback,
            });
        }
        let handler = Handler::from_boxed(callback, std::any::type_name::<F>())
            .priority(priority)
            .early(early);

        let router = plugin.router_entry(target.kind);
        let results: Vec<_> = if target.keys.is_empty() {
            vec![router.add_handler(handler.clone(), None)]
        } else {
            target
                .keys
                .into_iter()
                .map(|key| router.add_handler(handler.clone(), Some(key)))
                .collect()
        };
        // Every trigger targets the default router shape for its kind, so a
        // failure here is a broken invariant rather than bad input.
        let mut failed = 0;
        for err in results.into_iter().filter_map(Result::err) {
            failed += 1;
            error!(
                plugin = %plugin.name(),
                kind = %target.kind,
                error = %err,
                "Failed to register handler"
            );
        }
        debug_assert_eq!(failed, 0, "trigger registered into a mismatched router");

        handler
    }
}

// ─── ContainsText ────────────────────────────────────────────────────────────

/// Runs `inner` only when the message text contains one of `needles`.
struct ContainsText {
    needles: Vec<String>,
    inner: BoxedCallback,
}

impl ContainsText {
    fn matches(&self, update: &Update) -> bool {
        let Some(message) = update.as_message() else {
            return false;
        };
        let text = message.text.to_lowercase();
        self.needles.iter().any(|n| text.contains(n.as_str()))
    }
}

impl ErasedCallback for ContainsText {
    fn call(&self, update: Arc<Update>, env: Arc<Environment>) -> BoxFuture<'static, HandlerResult> {
        if self.matches(&update) {
            self.inner.call(update, env)
        } else {
            Box::pin(future::ready(Ok(Flow::Continue)))
        }
    }
}
