//! Single ordered list of handlers.

use relay_core::Update;
use relay_core::handler::{Handler, insert_sorted, sort_handlers};

use super::{RouterKind, Selection};

fn accept_all(_: &Update) -> bool {
    true
}

fn accept_raw(update: &Update) -> bool {
    matches!(update, Update::Raw(_))
}

/// One ordered list of handlers applied to every accepted update.
#[derive(Debug, Clone)]
pub struct ListRouter {
    kind: RouterKind,
    priority: i32,
    accepts: fn(&Update) -> bool,
    handlers: Vec<Handler>,
}

impl ListRouter {
    /// Router for always-run handlers. Applies to every update.
    pub fn special() -> Self {
        Self::tagged(RouterKind::Special, accept_all)
    }

    /// Router for non-message updates.
    pub fn raw() -> Self {
        Self::tagged(RouterKind::Raw, accept_raw)
    }

    /// Application-defined list router that applies to every update.
    pub fn custom(name: &'static str) -> Self {
        Self::tagged(RouterKind::Custom(name), accept_all)
    }

    /// Application-defined list router that applies to updates passing
    /// `accepts`.
    ///
    /// The router is always tagged [`RouterKind::Custom`].
    pub fn with_filter(name: &'static str, accepts: fn(&Update) -> bool) -> Self {
        Self::tagged(RouterKind::Custom(name), accepts)
    }

    fn tagged(kind: RouterKind, accepts: fn(&Update) -> bool) -> Self {
        Self {
            kind,
            priority: 0,
            accepts,
            handlers: Vec::new(),
        }
    }

    /// Sets the router priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(&self) -> RouterKind {
        self.kind
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Handlers in dispatch order.
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    pub(crate) fn handlers_mut(&mut self) -> &mut Vec<Handler> {
        &mut self.handlers
    }

    pub fn add_handler(&mut self, handler: Handler) {
        insert_sorted(&mut self.handlers, handler);
    }

    pub(crate) fn merge(&mut self, other: &ListRouter) {
        self.handlers.extend(other.handlers.iter().cloned());
        sort_handlers(&mut self.handlers);
    }

    pub(crate) fn select(&self, update: &Update) -> Option<Selection<'_>> {
        (self.accepts)(update).then(|| Selection::plain(&self.handlers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Message;
    use serde_json::json;

    #[test]
    fn test_raw_router_skips_messages() {
        let mut r = ListRouter::raw();
        r.add_handler(Handler::new(|_u, _e| async {}));

        assert!(r.select(&Update::Message(Message::text("hi"))).is_none());
        let sel = r.select(&Update::Raw(json!({"type": "group_join"}))).unwrap();
        assert_eq!(sel.len(), 1);
        assert!(sel.groups()[0].captures.is_empty());
    }

    #[test]
    fn test_filtered_router_is_custom_kind() {
        let mut r = ListRouter::with_filter("raw_joins", accept_raw);
        r.add_handler(Handler::new(|_u, _e| async {}));

        assert_eq!(r.kind(), RouterKind::Custom("raw_joins"));
        assert!(r.select(&Update::Message(Message::text("ping"))).is_none());
        assert!(r.select(&Update::Raw(json!({"type": "join"}))).is_some());
    }

    #[test]
    fn test_special_router_accepts_everything() {
        let r = ListRouter::special();
        assert!(r.select(&Update::Message(Message::default())).is_some());
        assert!(r.select(&Update::Raw(json!(null))).is_some());
    }

    #[test]
    fn test_early_handlers_lead_after_merge() {
        let late = Handler::new(|_u, _e| async {}).priority(100);
        let early = Handler::new(|_u, _e| async {}).early(true);

        let mut a = ListRouter::special();
        a.add_handler(late.clone());
        let mut b = ListRouter::special();
        b.add_handler(early.clone());
        a.merge(&b);

        assert!(a.handlers()[0].ptr_eq(&early));
        assert!(a.handlers()[1].ptr_eq(&late));
    }
}
