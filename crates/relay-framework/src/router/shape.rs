//! Dispatch on the shape of a message payload.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::warn;

use relay_core::Update;
use relay_core::handler::{Handler, insert_sorted, sort_handlers};

use super::{RouterKind, Selection};

#[derive(Debug, Clone)]
struct ShapeGroup {
    keys: BTreeSet<String>,
    handlers: Vec<Handler>,
}

fn key_set(example: &Value) -> Option<BTreeSet<String>> {
    example
        .as_object()
        .map(|obj| obj.keys().cloned().collect())
}

/// Routes messages by the top-level field names of their payload.
///
/// A payload matches the first registered key-set it contains. Messages
/// without an object payload are not routed here.
#[derive(Debug, Clone, Default)]
pub struct ShapeMatchRouter {
    priority: i32,
    groups: Vec<ShapeGroup>,
    catch_all: Vec<Handler>,
}

impl ShapeMatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the router priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(&self) -> RouterKind {
        RouterKind::Payload
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Records the key-set of `example`. Non-object values are ignored, as
    /// are key-sets already known.
    pub fn register(&mut self, example: &Value) {
        if let Some(keys) = key_set(example) {
            self.group_mut(keys);
        }
    }

    /// Known key-sets in registration order, each sorted.
    pub fn possible_key_sets(&self) -> Vec<Vec<String>> {
        self.groups
            .iter()
            .map(|g| g.keys.iter().cloned().collect())
            .collect()
    }

    pub fn handler_count(&self) -> usize {
        self.catch_all.len() + self.groups.iter().map(|g| g.handlers.len()).sum::<usize>()
    }

    /// Adds `handler` under the key-set of `example`.
    pub fn add_handler(&mut self, handler: Handler, example: &Value) {
        match key_set(example) {
            Some(keys) => insert_sorted(&mut self.group_mut(keys).handlers, handler),
            None => warn!(handler = handler.name(), "Ignoring non-object payload example"),
        }
    }

    /// Adds `handler` for object payloads matching no registered key-set.
    pub fn add_catch_all(&mut self, handler: Handler) {
        insert_sorted(&mut self.catch_all, handler);
    }

    fn group_mut(&mut self, keys: BTreeSet<String>) -> &mut ShapeGroup {
        let index = match self.groups.iter().position(|g| g.keys == keys) {
            Some(index) => index,
            None => {
                self.groups.push(ShapeGroup {
                    keys,
                    handlers: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[index]
    }

    pub(crate) fn merge(&mut self, other: &ShapeMatchRouter) {
        for theirs in &other.groups {
            let ours = self.group_mut(theirs.keys.clone());
            ours.handlers.extend(theirs.handlers.iter().cloned());
            sort_handlers(&mut ours.handlers);
        }
        self.catch_all.extend(other.catch_all.iter().cloned());
        sort_handlers(&mut self.catch_all);
    }

    pub(crate) fn for_each_list_mut(&mut self, mut f: impl FnMut(&mut Vec<Handler>)) {
        for group in &mut self.groups {
            f(&mut group.handlers);
        }
        f(&mut self.catch_all);
    }

    pub(crate) fn select(&self, update: &Update) -> Option<Selection<'_>> {
        let payload = update.as_message()?.payload_object()?;
        let group = self
            .groups
            .iter()
            .find(|g| g.keys.iter().all(|k| payload.contains_key(k)));
        Some(Selection::plain(match group {
            Some(group) => &group.handlers,
            None => &self.catch_all,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Message;
    use serde_json::json;

    fn noop() -> Handler {
        Handler::new(|_u, _e| async {})
    }

    fn with_payload(payload: Value) -> Update {
        Message::text("").with_payload(payload).into()
    }

    #[test]
    fn test_key_sets_dedup_across_merge() {
        let mut a = ShapeMatchRouter::new();
        a.register(&json!({"a": 1, "b": 2}));
        a.register(&json!({"c": 1, "d": 2}));
        a.register(&json!("not an object"));

        let mut b = ShapeMatchRouter::new();
        b.register(&json!({"b": 0, "a": 0}));
        b.register(&json!({"d": 0, "c": 0}));

        a.merge(&b);
        assert_eq!(a.possible_key_sets(), vec![vec!["a", "b"], vec!["c", "d"]]);

        a.register(&json!({"e": true}));
        assert_eq!(
            a.possible_key_sets(),
            vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]
        );
    }

    #[test]
    fn test_superset_payload_matches_first_key_set() {
        let mut r = ShapeMatchRouter::new();
        let cmd = noop();
        let cmd_arg = noop();
        r.add_handler(cmd.clone(), &json!({"command": ""}));
        r.add_handler(cmd_arg, &json!({"command": "", "arg": 0}));

        let sel = r.select(&with_payload(json!({"command": "buy", "arg": 3}))).unwrap();
        assert_eq!(sel.len(), 1);
        assert!(sel.handlers().next().unwrap().ptr_eq(&cmd));

        let sel = r.select(&with_payload(json!({"other": 1}))).unwrap();
        assert!(sel.is_empty());
    }

    #[test]
    fn test_non_object_payload_not_routed() {
        let mut r = ShapeMatchRouter::new();
        r.add_catch_all(noop());
        assert!(r.select(&with_payload(json!([1, 2]))).is_none());
        assert!(r.select(&Message::text("plain").into()).is_none());
        assert_eq!(r.select(&with_payload(json!({}))).unwrap().len(), 1);
    }

    #[test]
    fn test_merge_handlers_per_key_set() {
        let mut a = ShapeMatchRouter::new();
        a.add_handler(noop().priority(1), &json!({"x": 0}));
        let mut b = ShapeMatchRouter::new();
        b.add_handler(noop().priority(2), &json!({"x": 1}));
        b.add_handler(noop(), &json!({"y": 1}));
        a.merge(&b);

        assert_eq!(a.handler_count(), 3);
        let sel = a.select(&with_payload(json!({"x": 5}))).unwrap();
        let prios: Vec<i32> = sel.handlers().map(Handler::get_priority).collect();
        assert_eq!(prios, vec![2, 1]);
    }
}
