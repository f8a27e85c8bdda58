use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;

use relay_core::{BoxError, Environment};

use super::registration::{Registration, Target};
use crate::error::{RouterError, RouterResult};
use crate::router::{
    AnyMessageRouter, ListRouter, MapRouter, MatchMode, RouteKey, Router, RouterKind,
    ShapeMatchRouter,
};

// ─── Hooks ───────────────────────────────────────────────────────────────────

/// Conversion from a lifecycle hook's return value.
///
/// Implemented for `()` and for `Result<(), E>` with any error convertible to
/// [`BoxError`].
pub trait IntoHookResult {
    fn into_hook_result(self) -> Result<(), BoxError>;
}

impl IntoHookResult for () {
    fn into_hook_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E: Into<BoxError>> IntoHookResult for Result<(), E> {
    fn into_hook_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

/// Stored startup hook. Receives a root environment bound to the engine's
/// transport.
pub type StartupHook =
    Arc<dyn Fn(Arc<Environment>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Stored dispose hook.
pub type DisposeHook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Lifecycle half of a plugin, kept by the engine after its routers are merged.
#[derive(Clone)]
pub(crate) struct PluginHooks {
    pub(crate) name: Cow<'static, str>,
    pub(crate) startup: Vec<StartupHook>,
    pub(crate) dispose: Vec<DisposeHook>,
}

// ─── Plugin ──────────────────────────────────────────────────────────────────

/// A named bundle of routers and lifecycle hooks.
///
/// A plugin owns at most one router per [`RouterKind`], created the first time
/// a registration needs it. Plugins with a higher priority have their routers
/// merged first and their hooks run first.
///
/// # Example
///
/// ```rust,ignore
/// let mut plugin = Plugin::new("dice").with_priority(10);
///
/// plugin.on_regex(r"roll (\d+)")?.handle(|_update, env| async move {
///     let sides = env.get_meta("match").and_then(|m| m[1].as_str().map(str::to_owned));
///     env.reply(&format!("rolling d{}", sides.unwrap_or_default()), Default::default()).await;
///     Flow::Stop
/// });
///
/// plugin.on_startup(|_env| async { tracing::info!("dice ready") });
/// ```
pub struct Plugin {
    name: Cow<'static, str>,
    priority: i32,
    routers: Vec<Router>,
    startup_hooks: Vec<StartupHook>,
    dispose_hooks: Vec<DisposeHook>,
}

impl Plugin {
    /// Creates an empty plugin with priority 0.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            routers: Vec::new(),
            startup_hooks: Vec::new(),
            dispose_hooks: Vec::new(),
        }
    }

    /// Sets the plugin priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the plugin's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Routers in creation order.
    pub fn routers(&self) -> &[Router] {
        &self.routers
    }

    /// The router of `kind`, if one was created.
    pub fn router(&self, kind: RouterKind) -> Option<&Router> {
        self.routers.iter().find(|r| r.kind() == kind)
    }

    pub(crate) fn router_entry(&mut self, kind: RouterKind) -> &mut Router {
        let index = match self.routers.iter().position(|r| r.kind() == kind) {
            Some(index) => index,
            None => {
                self.routers.push(default_router(kind));
                self.routers.len() - 1
            }
        };
        &mut self.routers[index]
    }

    // ─── Triggers ────────────────────────────────────────────────────────────

    /// Messages whose text equals one of `texts` exactly.
    pub fn on_text<I, S>(&mut self, texts: I) -> Registration<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = texts.into_iter().map(|t| RouteKey::Text(t.into())).collect();
        Registration::new(self, Target::new(RouterKind::Text).keys(keys))
    }

    /// Messages whose text starts with one of `prefixes`, ignoring case.
    ///
    /// The handler finds the remainder in meta `body` and its words in `args`.
    pub fn on_startswith_text<I, S>(&mut self, prefixes: I) -> Registration<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = prefixes
            .into_iter()
            .map(|p| RouteKey::Text(p.into()))
            .collect();
        Registration::new(self, Target::new(RouterKind::Prefix).keys(keys))
    }

    /// Messages whose text matches `pattern` from its first character.
    ///
    /// The handler finds the groups in meta `match`.
    pub fn on_regex(&mut self, pattern: &str) -> RouterResult<Registration<'_>> {
        let regex = Regex::new(pattern)?;
        Ok(self.on_regex_compiled(regex))
    }

    /// Like [`on_regex`](Self::on_regex) with an already compiled pattern.
    pub fn on_regex_compiled(&mut self, regex: Regex) -> Registration<'_> {
        Registration::new(
            self,
            Target::new(RouterKind::Regex).keys(vec![RouteKey::Pattern(regex)]),
        )
    }

    /// Messages with non-empty text containing one of `substrings`, ignoring
    /// case. An empty list accepts any text.
    pub fn on_has_text<I, S>(&mut self, substrings: I) -> Registration<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut target = Target::new(RouterKind::HasText);
        target.contains = substrings
            .into_iter()
            .map(|s| Into::<String>::into(s).to_lowercase())
            .collect();
        Registration::new(self, target)
    }

    /// Messages carrying an attachment of one of `kinds`. An empty list
    /// accepts any attachment.
    pub fn on_attachment<I, S>(&mut self, kinds: I) -> Registration<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = kinds.into_iter().map(|k| RouteKey::Text(k.into())).collect();
        Registration::new(self, Target::new(RouterKind::Attachment).keys(keys))
    }

    /// Every message.
    pub fn on_any_message(&mut self) -> Registration<'_> {
        Registration::new(self, Target::new(RouterKind::AnyMessage))
    }

    /// Messages whose payload has the fields of one of `examples`.
    pub fn on_payload<I>(&mut self, examples: I) -> Registration<'_>
    where
        I: IntoIterator<Item = Value>,
    {
        let keys = examples.into_iter().map(RouteKey::Shape).collect();
        Registration::new(self, Target::new(RouterKind::Payload).keys(keys))
    }

    /// Updates that are not messages.
    pub fn on_raw(&mut self) -> Registration<'_> {
        Registration::new(self, Target::new(RouterKind::Raw))
    }

    /// Every update, ahead of all keyed routers of the same priority.
    pub fn register_special(&mut self) -> Registration<'_> {
        Registration::new(self, Target::new(RouterKind::Special))
    }

    /// Merges a hand-built router into this plugin's router of the same kind,
    /// or adopts it when there is none yet.
    ///
    /// A router tagged with a built-in kind must have that kind's shape, since
    /// the `on_*` triggers register into it.
    pub fn add_router(&mut self, router: Router) -> RouterResult<&mut Self> {
        let kind = router.kind();
        if !matches!(kind, RouterKind::Custom(_)) && !same_shape(&router, &default_router(kind)) {
            return Err(RouterError::Incompatible {
                left: kind,
                right: kind,
            });
        }
        match self.routers.iter_mut().find(|r| r.kind() == kind) {
            Some(existing) => {
                existing.merge(&router)?;
            }
            None => self.routers.push(router),
        }
        Ok(self)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Adds a hook run once when the engine starts. A failure aborts startup.
    pub fn on_startup<F, Fut, R>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Arc<Environment>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoHookResult + 'static,
    {
        self.startup_hooks.push(Arc::new(
            move |env: Arc<Environment>| -> BoxFuture<'static, Result<(), BoxError>> {
                let fut = hook(env);
                Box::pin(async move { fut.await.into_hook_result() })
            },
        ));
        self
    }

    /// Adds a hook run once when the engine shuts down. Failures are logged.
    pub fn on_dispose<F, Fut, R>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoHookResult + 'static,
    {
        self.dispose_hooks.push(Arc::new(
            move || -> BoxFuture<'static, Result<(), BoxError>> {
                let fut = hook();
                Box::pin(async move { fut.await.into_hook_result() })
            },
        ));
        self
    }

    pub(crate) fn into_parts(self) -> (PluginHooks, Vec<Router>) {
        let hooks = PluginHooks {
            name: self.name,
            startup: self.startup_hooks,
            dispose: self.dispose_hooks,
        };
        (hooks, self.routers)
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("routers", &self.routers.iter().map(Router::kind).collect::<Vec<_>>())
            .field("startup_hooks", &self.startup_hooks.len())
            .field("dispose_hooks", &self.dispose_hooks.len())
            .finish()
    }
}

fn default_router(kind: RouterKind) -> Router {
    match kind {
        RouterKind::Special => ListRouter::special().into(),
        RouterKind::Text => MapRouter::new(MatchMode::Exact).into(),
        RouterKind::Prefix => MapRouter::new(MatchMode::Prefix).into(),
        RouterKind::Regex => MapRouter::new(MatchMode::Regex).into(),
        RouterKind::Payload => ShapeMatchRouter::new().into(),
        RouterKind::Attachment => MapRouter::new(MatchMode::Attachment).into(),
        RouterKind::HasText => AnyMessageRouter::has_text().into(),
        RouterKind::AnyMessage => AnyMessageRouter::any_message().into(),
        RouterKind::Raw => ListRouter::raw().into(),
        RouterKind::Custom(name) => ListRouter::custom(name).into(),
    }
}

fn same_shape(a: &Router, b: &Router) -> bool {
    match (a, b) {
        (Router::Map(a), Router::Map(b)) => a.mode() == b.mode(),
        _ => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Flow;
    use serde_json::json;

    #[test]
    fn test_one_router_per_kind() {
        let mut p = Plugin::new("p");
        p.on_text(["a"]).handle(|_u, _e| async {});
        p.on_text(["b", "c"]).handle(|_u, _e| async {});
        p.on_any_message().handle(|_u, _e| async {});

        assert_eq!(p.routers().len(), 2);
        assert_eq!(p.router(RouterKind::Text).map(Router::handler_count), Some(3));
        assert!(p.router(RouterKind::Regex).is_none());
    }

    #[test]
    fn test_handle_returns_configured_handler() {
        let mut p = Plugin::new("p");
        let h = p
            .register_special()
            .priority(7)
            .early(true)
            .handle(|_u, _e| async { Flow::Stop });
        assert_eq!(h.get_priority(), 7);
        assert!(h.is_early());

        let Some(Router::List(list)) = p.router(RouterKind::Special) else {
            panic!("expected special list router");
        };
        assert!(list.handlers()[0].ptr_eq(&h));
    }

    #[test]
    fn test_on_regex_rejects_bad_pattern() {
        let mut p = Plugin::new("p");
        assert!(matches!(
            p.on_regex("(unclosed"),
            Err(RouterError::InvalidPattern(_))
        ));
        assert!(p.routers().is_empty());
    }

    #[test]
    fn test_on_payload_registers_key_sets() {
        let mut p = Plugin::new("p");
        p.on_payload([json!({"cmd": 1}), json!({"cmd": 1, "arg": 2})])
            .handle(|_u, _e| async {});

        let Some(Router::Shape(shape)) = p.router(RouterKind::Payload) else {
            panic!("expected shape router");
        };
        assert_eq!(
            shape.possible_key_sets(),
            vec![vec!["cmd"], vec!["arg", "cmd"]]
        );
    }

    #[test]
    fn test_add_router_merges_same_kind() {
        let mut p = Plugin::new("p");
        p.on_any_message().handle(|_u, _e| async {});

        let mut extra = AnyMessageRouter::any_message();
        extra.add_handler(relay_core::Handler::new(|_u, _e| async {}));
        p.add_router(extra.into()).unwrap();
        assert_eq!(p.routers().len(), 1);
        assert_eq!(p.routers()[0].handler_count(), 2);

        let bumped = AnyMessageRouter::any_message().with_priority(3);
        assert!(matches!(
            p.add_router(bumped.into()),
            Err(RouterError::PriorityMismatch { .. })
        ));

        p.add_router(ListRouter::raw().into()).unwrap();
        assert_eq!(p.routers().len(), 2);
    }

    #[test]
    fn test_filtered_router_cannot_take_over_text() {
        fn is_join(update: &relay_core::Update) -> bool {
            matches!(update, relay_core::Update::Raw(_))
        }

        let mut p = Plugin::new("p");
        let mut joins = ListRouter::with_filter("joins", is_join);
        joins.add_handler(relay_core::Handler::new(|_u, _e| async {}));
        p.add_router(joins.into()).unwrap();

        let text = p.on_text(["ping"]).handle(|_u, _e| async {});

        assert_eq!(p.routers().len(), 2);
        assert_eq!(p.routers()[0].kind(), RouterKind::Custom("joins"));
        let Some(Router::Map(map)) = p.router(RouterKind::Text) else {
            panic!("expected text map router");
        };
        assert!(map.handlers_for("ping").unwrap()[0].ptr_eq(&text));

        let raw = relay_core::Update::Raw(json!({"type": "join"}));
        let sel = p.routers()[1].select(&raw);
        assert!(sel.is_none());
    }

    #[test]
    fn test_attachment_without_kinds_is_catch_all() {
        let mut p = Plugin::new("p");
        p.on_attachment(Vec::<String>::new()).handle(|_u, _e| async {});
        let Some(Router::Map(map)) = p.router(RouterKind::Attachment) else {
            panic!("expected map router");
        };
        assert_eq!(map.catch_all().len(), 1);
        assert_eq!(map.keys().count(), 0);
    }
}
