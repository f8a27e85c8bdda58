//! Router family.
//!
//! A [`Router`] is an ordered or keyed collection of [`Handler`]s with a merge
//! contract. Four concrete shapes exist:
//!
//! | type | storage | applies to |
//! |------|---------|------------|
//! | [`ListRouter`] | one ordered list | every update, or raw updates only |
//! | [`MapRouter`] | key → list, plus catch-all | messages, keyed by text / prefix / pattern / attachment type |
//! | [`AnyMessageRouter`] | one ordered list | messages passing a predicate |
//! | [`ShapeMatchRouter`] | key-set → list | messages whose payload has a registered shape |
//!
//! Every router carries an explicit [`RouterKind`] tag. Two routers merge only
//! when their tags (and priorities) are exactly equal; there is no looser
//! "is a" relation between kinds.
//!
//! ```rust,ignore
//! let mut a = ListRouter::special();
//! a.add_handler(Handler::new(log).priority(9));
//! let mut b = ListRouter::special();
//! b.add_handler(Handler::new(audit).priority(10));
//!
//! let mut a = Router::from(a);
//! a.merge(&Router::from(b))?;          // audit, log
//! a.merge(&MapRouter::new(MatchMode::Exact).into()).unwrap_err();
//! ```

mod any_message;
mod list;
mod map;
mod shape;

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, error, trace};

use relay_core::{Environment, Flow, Handler, Update};

use crate::error::{RouterError, RouterResult};

pub use any_message::AnyMessageRouter;
pub use list::ListRouter;
pub use map::{MapRouter, MatchMode};
pub use shape::ShapeMatchRouter;

// =============================================================================
// RouterKind
// =============================================================================

/// Explicit tag identifying what a router routes on.
///
/// The declaration order is the execution order of routers that share a
/// priority inside an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RouterKind {
    /// Always-run handlers ([`ListRouter`]).
    Special,
    /// Exact text ([`MapRouter`]).
    Text,
    /// Text prefix ([`MapRouter`]).
    Prefix,
    /// Regular expression ([`MapRouter`]).
    Regex,
    /// Payload shape ([`ShapeMatchRouter`]).
    Payload,
    /// Attachment type ([`MapRouter`]).
    Attachment,
    /// Messages with text ([`AnyMessageRouter`]).
    HasText,
    /// Every message ([`AnyMessageRouter`]).
    AnyMessage,
    /// Non-message updates ([`ListRouter`]).
    Raw,
    /// Application-defined kind.
    Custom(&'static str),
}

impl fmt::Display for RouterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Special => f.write_str("special"),
            Self::Text => f.write_str("text"),
            Self::Prefix => f.write_str("prefix"),
            Self::Regex => f.write_str("regex"),
            Self::Payload => f.write_str("payload"),
            Self::Attachment => f.write_str("attachment"),
            Self::HasText => f.write_str("has_text"),
            Self::AnyMessage => f.write_str("any_message"),
            Self::Raw => f.write_str("raw"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

// =============================================================================
// RouteKey / Selection
// =============================================================================

/// Discriminator passed to [`Router::add_handler`] for keyed routers.
#[derive(Debug, Clone)]
pub enum RouteKey {
    /// A text, prefix or attachment type.
    Text(String),
    /// A compiled pattern.
    Pattern(Regex),
    /// An example payload whose field names form the key-set.
    Shape(Value),
}

impl From<&str> for RouteKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for RouteKey {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Regex> for RouteKey {
    fn from(r: Regex) -> Self {
        Self::Pattern(r)
    }
}

impl From<Value> for RouteKey {
    fn from(v: Value) -> Self {
        Self::Shape(v)
    }
}

/// Handlers chosen from one list of a router, with the meta entries its
/// match produced.
#[derive(Debug)]
pub struct Matched<'r> {
    /// Handlers to run, in order.
    pub handlers: &'r [Handler],
    /// Meta entries written into each handler's environment before it runs.
    pub captures: Map<String, Value>,
}

/// The handlers a router chose for one update.
///
/// A keyed router contributes one group per matching key, in registration
/// order.
#[derive(Debug, Default)]
pub struct Selection<'r> {
    groups: Vec<Matched<'r>>,
}

impl<'r> Selection<'r> {
    /// A selection of one list without captures.
    pub fn plain(handlers: &'r [Handler]) -> Self {
        let mut selection = Self::default();
        selection.push(handlers, Map::new());
        selection
    }

    /// Appends a group.
    pub fn push(&mut self, handlers: &'r [Handler], captures: Map<String, Value>) {
        self.groups.push(Matched { handlers, captures });
    }

    pub fn groups(&self) -> &[Matched<'r>] {
        &self.groups
    }

    /// Every selected handler in run order, duplicates included.
    pub fn handlers(&self) -> impl Iterator<Item = &'r Handler> + '_ {
        self.groups.iter().flat_map(|g| g.handlers.iter())
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.handlers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs `selection` in order until a handler stops the chain.
///
/// `env_for` picks the environment for each handler. A handler found in more
/// than one group runs only with the first. A failing or panicking handler is
/// logged and treated as [`Flow::Continue`].
pub async fn run_chain<F>(selection: Selection<'_>, update: &Arc<Update>, mut env_for: F) -> Flow
where
    F: FnMut(&Handler) -> Arc<Environment>,
{
    let groups = selection.groups();
    let mut index = 0usize;

    for (position, group) in groups.iter().enumerate() {
        for handler in group.handlers {
            let seen = groups[..position]
                .iter()
                .any(|g| g.handlers.iter().any(|h| h.ptr_eq(handler)));
            if seen {
                continue;
            }

            let env = env_for(handler);
            if !group.captures.is_empty() {
                env.extend_meta(&group.captures);
            }

            trace!(handler = handler.name(), index, "Executing handler");
            index += 1;
            match handler.invoke(Arc::clone(update), env).await {
                Ok(Flow::Stop) => {
                    debug!(handler = handler.name(), "Handler stopped the chain");
                    return Flow::Stop;
                }
                Ok(Flow::Continue) => {}
                Err(err) => {
                    error!(
                        handler = handler.name(),
                        error = %err,
                        "Handler failed"
                    );
                }
            }
        }
    }
    Flow::Continue
}

// =============================================================================
// Router
// =============================================================================

/// A router of any concrete shape.
#[derive(Debug, Clone)]
pub enum Router {
    /// See [`ListRouter`].
    List(ListRouter),
    /// See [`MapRouter`].
    Map(MapRouter),
    /// See [`AnyMessageRouter`].
    AnyMessage(AnyMessageRouter),
    /// See [`ShapeMatchRouter`].
    Shape(ShapeMatchRouter),
}

impl Router {
    /// Returns the kind tag.
    pub fn kind(&self) -> RouterKind {
        match self {
            Self::List(r) => r.kind(),
            Self::Map(r) => r.kind(),
            Self::AnyMessage(r) => r.kind(),
            Self::Shape(r) => r.kind(),
        }
    }

    /// Returns the router priority.
    pub fn priority(&self) -> i32 {
        match self {
            Self::List(r) => r.priority(),
            Self::Map(r) => r.priority(),
            Self::AnyMessage(r) => r.priority(),
            Self::Shape(r) => r.priority(),
        }
    }

    /// Total number of handler slots (a handler registered under two keys
    /// counts twice).
    pub fn handler_count(&self) -> usize {
        match self {
            Self::List(r) => r.handlers().len(),
            Self::Map(r) => r.handler_count(),
            Self::AnyMessage(r) => r.handlers().len(),
            Self::Shape(r) => r.handler_count(),
        }
    }

    /// Inserts `handler` in sorted position.
    ///
    /// `key` is required by keyed routers and ignored by list routers.
    pub fn add_handler(&mut self, handler: Handler, key: Option<RouteKey>) -> RouterResult<()> {
        match self {
            Self::List(r) => {
                r.add_handler(handler);
                Ok(())
            }
            Self::AnyMessage(r) => {
                r.add_handler(handler);
                Ok(())
            }
            Self::Map(r) => r.add_handler(handler, key),
            Self::Shape(r) => match key {
                Some(RouteKey::Shape(example)) => {
                    r.add_handler(handler, &example);
                    Ok(())
                }
                None => {
                    r.add_catch_all(handler);
                    Ok(())
                }
                Some(_) => Err(RouterError::UnsupportedKey {
                    kind: r.kind(),
                    key: "non-payload",
                }),
            },
        }
    }

    /// Picks the handlers applicable to `update`, or `None` when this router
    /// does not apply to it at all.
    pub fn select(&self, update: &Update) -> Option<Selection<'_>> {
        match self {
            Self::List(r) => r.select(update),
            Self::Map(r) => r.select(update),
            Self::AnyMessage(r) => r.select(update),
            Self::Shape(r) => r.select(update),
        }
    }

    /// Dispatches `update` to the applicable handlers, all sharing `env`.
    pub async fn dispatch(&self, update: Arc<Update>, env: Arc<Environment>) -> Flow {
        match self.select(&update) {
            Some(selection) => run_chain(selection, &update, |_| Arc::clone(&env)).await,
            None => Flow::Continue,
        }
    }

    /// Merges `other`'s handlers into `self`.
    ///
    /// Both routers must have exactly the same [`RouterKind`] and priority.
    /// On equal ordering keys, `self`'s handlers stay ahead of `other`'s.
    pub fn merge(&mut self, other: &Router) -> RouterResult<&mut Self> {
        let (left, right) = (self.kind(), other.kind());
        if left != right {
            return Err(RouterError::Incompatible { left, right });
        }
        if self.priority() != other.priority() {
            return Err(RouterError::PriorityMismatch {
                kind: left,
                left: self.priority(),
                right: other.priority(),
            });
        }

        match (&mut *self, other) {
            (Self::List(a), Self::List(b)) => a.merge(b),
            (Self::AnyMessage(a), Self::AnyMessage(b)) => a.merge(b),
            (Self::Map(a), Self::Map(b)) if a.mode() == b.mode() => a.merge(b),
            (Self::Shape(a), Self::Shape(b)) => a.merge(b),
            _ => return Err(RouterError::Incompatible { left, right }),
        }
        Ok(self)
    }

    /// Tags every handler with the owning plugin's scope.
    pub(crate) fn rescope(&mut self, scope: usize) {
        let retag = |handlers: &mut Vec<Handler>| {
            for h in handlers.iter_mut() {
                *h = h.with_scope(scope);
            }
        };
        match self {
            Self::List(r) => retag(r.handlers_mut()),
            Self::AnyMessage(r) => retag(r.handlers_mut()),
            Self::Map(r) => r.for_each_list_mut(retag),
            Self::Shape(r) => r.for_each_list_mut(retag),
        }
    }
}

impl From<ListRouter> for Router {
    fn from(r: ListRouter) -> Self {
        Self::List(r)
    }
}

impl From<MapRouter> for Router {
    fn from(r: MapRouter) -> Self {
        Self::Map(r)
    }
}

impl From<AnyMessageRouter> for Router {
    fn from(r: AnyMessageRouter) -> Self {
        Self::AnyMessage(r)
    }
}

impl From<ShapeMatchRouter> for Router {
    fn from(r: ShapeMatchRouter) -> Self {
        Self::Shape(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Message;
    use relay_core::testing::NullTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn h(priority: i32) -> Handler {
        Handler::new(|_u, _e| async {}).priority(priority)
    }

    fn all_routers() -> Vec<Router> {
        vec![
            ListRouter::special().into(),
            ListRouter::raw().into(),
            ListRouter::custom("sub").into(),
            MapRouter::new(MatchMode::Exact).into(),
            MapRouter::new(MatchMode::Prefix).into(),
            MapRouter::new(MatchMode::Regex).into(),
            MapRouter::new(MatchMode::Attachment).into(),
            AnyMessageRouter::any_message().into(),
            AnyMessageRouter::has_text().into(),
            AnyMessageRouter::custom("sub", |_| true).into(),
            ShapeMatchRouter::new().into(),
        ]
    }

    #[test]
    fn test_merge_rejects_differing_kinds() {
        let routers = all_routers();
        for (i, a) in routers.iter().enumerate() {
            for (j, b) in routers.iter().enumerate() {
                let mut left = a.clone();
                let res = left.merge(b);
                if i == j {
                    assert!(res.is_ok(), "{} should merge with itself", a.kind());
                } else {
                    assert!(
                        matches!(res, Err(RouterError::Incompatible { .. })),
                        "{} merged with {}",
                        a.kind(),
                        b.kind()
                    );
                }
            }
        }
    }

    #[test]
    fn test_merge_rejects_custom_kind_of_other_shape() {
        let mut list: Router = ListRouter::custom("sub").into();
        let any: Router = AnyMessageRouter::custom("sub", |_| true).into();
        assert!(matches!(
            list.merge(&any),
            Err(RouterError::Incompatible { .. })
        ));
    }

    #[test]
    fn test_merge_keeps_both_sides_intact_on_failure() {
        let mut any = AnyMessageRouter::any_message();
        any.add_handler(h(0));
        any.add_handler(h(0));
        let mut sub = AnyMessageRouter::custom("sub", |_| true);
        sub.add_handler(h(0));

        let mut any = Router::from(any);
        let sub = Router::from(sub);
        assert!(any.merge(&sub).is_err());
        assert_eq!(any.handler_count(), 2);
        assert_eq!(sub.handler_count(), 1);
    }

    #[test]
    fn test_merge_rejects_priority_mismatch() {
        let mut a: Router = AnyMessageRouter::any_message().with_priority(9).into();
        let b: Router = AnyMessageRouter::any_message().with_priority(7).into();
        assert!(matches!(
            a.merge(&b),
            Err(RouterError::PriorityMismatch {
                left: 9,
                right: 7,
                ..
            })
        ));
    }

    #[test]
    fn test_merge_priority_order() {
        let handlers: Vec<Handler> = (0..4).map(|_| h(0)).collect();
        let mut a = ListRouter::special();
        a.add_handler(handlers[0].clone().priority(9));
        a.add_handler(handlers[1].clone().priority(7));
        let mut b = ListRouter::special();
        b.add_handler(handlers[2].clone().priority(10));
        b.add_handler(handlers[3].clone().priority(3));

        let mut a = Router::from(a);
        a.merge(&b.into()).unwrap();

        let Router::List(list) = &a else {
            panic!("expected list router")
        };
        let priorities: Vec<i32> = list.handlers().iter().map(Handler::get_priority).collect();
        assert_eq!(priorities, vec![10, 9, 7, 3]);
        assert_eq!(a.handler_count(), 4);
    }

    #[test]
    fn test_add_handler_key_validation() {
        let mut shape: Router = ShapeMatchRouter::new().into();
        assert!(shape.add_handler(h(0), Some("text".into())).is_err());

        let mut regex: Router = MapRouter::new(MatchMode::Regex).into();
        assert!(matches!(
            regex.add_handler(h(0), Some("(".into())),
            Err(RouterError::InvalidPattern(_))
        ));
        assert!(regex.add_handler(h(0), Some("a+".into())).is_ok());

        let mut list: Router = ListRouter::special().into();
        assert!(list.add_handler(h(0), Some("ignored".into())).is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_stop_short_circuits() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&counter);
        let c2 = Arc::clone(&counter);

        let mut router = ListRouter::special();
        router.add_handler(Handler::new(move |_u, _e| {
            let c = Arc::clone(&c1);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Flow::Stop
            }
        }));
        router.add_handler(Handler::new(move |_u, _e| {
            let c = Arc::clone(&c2);
            async move {
                c.fetch_add(10, Ordering::SeqCst);
            }
        }));

        let env = Environment::root(NullTransport::shared(), None);
        let update = Arc::new(Update::Message(Message::text("hi")));
        let flow = Router::from(router).dispatch(update, env).await;

        assert_eq!(flow, Flow::Stop);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_recovers_from_failures() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let mut router = ListRouter::special();
        router.add_handler(Handler::new(|_u, _e| async {
            Err::<Flow, _>("boom")
        }));
        router.add_handler(Handler::new(|_u, _e| async {
            if true {
                panic!("worse");
            }
        }));
        router.add_handler(Handler::new(move |_u, _e| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let env = Environment::root(NullTransport::shared(), None);
        let update = Arc::new(Update::Raw(Value::Null));
        let flow = Router::from(router).dispatch(update, env).await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
