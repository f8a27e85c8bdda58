//! Ordered list of handlers for messages passing a predicate.

use relay_core::handler::{Handler, insert_sorted, sort_handlers};
use relay_core::{Message, Update};

use super::{RouterKind, Selection};

fn any(_: &Message) -> bool {
    true
}

fn has_text(message: &Message) -> bool {
    !message.text.is_empty()
}

/// Applies its handlers to every message accepted by a predicate.
///
/// Non-message updates are never routed here.
#[derive(Debug, Clone)]
pub struct AnyMessageRouter {
    kind: RouterKind,
    priority: i32,
    predicate: fn(&Message) -> bool,
    handlers: Vec<Handler>,
}

impl AnyMessageRouter {
    /// Router for every message.
    pub fn any_message() -> Self {
        Self::custom_kind(RouterKind::AnyMessage, any)
    }

    /// Router for messages with non-empty text.
    pub fn has_text() -> Self {
        Self::custom_kind(RouterKind::HasText, has_text)
    }

    /// Application-defined router.
    pub fn custom(name: &'static str, predicate: fn(&Message) -> bool) -> Self {
        Self::custom_kind(RouterKind::Custom(name), predicate)
    }

    fn custom_kind(kind: RouterKind, predicate: fn(&Message) -> bool) -> Self {
        Self {
            kind,
            priority: 0,
            predicate,
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

    pub(crate) fn merge(&mut self, other: &AnyMessageRouter) {
        self.handlers.extend(other.handlers.iter().cloned());
        sort_handlers(&mut self.handlers);
    }

    pub(crate) fn select(&self, update: &Update) -> Option<Selection<'_>> {
        let message = update.as_message()?;
        (self.predicate)(message).then(|| Selection::plain(&self.handlers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_has_text_requires_text() {
        let r = AnyMessageRouter::has_text();
        assert!(r.select(&Message::text("").into()).is_none());
        assert!(r.select(&Message::text("x").into()).is_some());
        assert!(r.select(&Update::Raw(Value::Null)).is_none());
    }

    #[test]
    fn test_merge_interleaves_by_priority() {
        let hs: Vec<Handler> = (0..4).map(|_| Handler::new(|_u, _e| async {})).collect();

        let mut a = AnyMessageRouter::any_message();
        a.add_handler(hs[0].clone().priority(0));
        a.add_handler(hs[1].clone().priority(5));
        let mut b = AnyMessageRouter::any_message();
        b.add_handler(hs[2].clone().priority(3));
        b.add_handler(hs[3].clone().priority(10));
        a.merge(&b);

        let order: Vec<usize> = a
            .handlers()
            .iter()
            .map(|h| hs.iter().position(|x| x.ptr_eq(h)).unwrap())
            .collect();
        assert_eq!(order, vec![3, 1, 2, 0]);
    }
}
