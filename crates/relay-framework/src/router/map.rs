//! Keyed dispatch on text, prefixes, patterns and attachment types.

use regex::Regex;
use serde_json::{Map, Value};

use relay_core::handler::{Handler, insert_sorted, sort_handlers};
use relay_core::{Message, Update};

use super::{RouteKey, RouterKind, Selection};
use crate::error::{RouterError, RouterResult};

/// How a [`MapRouter`] derives a key match from a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMode {
    /// Text equals the key, case-sensitive.
    Exact,
    /// Lower-cased text starts with the lower-cased key.
    ///
    /// Captures `body` (text after the prefix, trimmed) and `args` (body
    /// split on whitespace).
    Prefix,
    /// The pattern matches at the start of the text.
    ///
    /// Captures `match`: the whole match followed by each group, `null` for
    /// groups that did not participate.
    Regex,
    /// The key equals the kind of one of the message's attachments.
    ///
    /// The catch-all list holds "any attachment" handlers and runs for every
    /// message with attachments.
    Attachment,
}

impl MatchMode {
    /// The router kind for this mode.
    pub fn kind(self) -> RouterKind {
        match self {
            Self::Exact => RouterKind::Text,
            Self::Prefix => RouterKind::Prefix,
            Self::Regex => RouterKind::Regex,
            Self::Attachment => RouterKind::Attachment,
        }
    }
}

#[derive(Debug, Clone)]
struct Route {
    key: String,
    regex: Option<Regex>,
    handlers: Vec<Handler>,
}

/// Maps a key derived from each message to an ordered list of handlers.
///
/// Every matching key contributes its handlers, in key registration order.
/// When no key matches, the catch-all list runs instead (in
/// [`MatchMode::Attachment`] it runs after the matched keys regardless).
#[derive(Debug, Clone)]
pub struct MapRouter {
    mode: MatchMode,
    priority: i32,
    routes: Vec<Route>,
    catch_all: Vec<Handler>,
}

impl MapRouter {
    pub fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            priority: 0,
            routes: Vec::new(),
            catch_all: Vec::new(),
        }
    }

    /// Sets the router priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn kind(&self) -> RouterKind {
        self.mode.kind()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Registered keys in match order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.key.as_str())
    }

    /// Handlers registered under `key`, as normalized by this router.
    pub fn handlers_for(&self, key: &str) -> Option<&[Handler]> {
        self.routes
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.handlers.as_slice())
    }

    /// Handlers run when no key matches, or for any attachment.
    pub fn catch_all(&self) -> &[Handler] {
        &self.catch_all
    }

    pub fn handler_count(&self) -> usize {
        self.catch_all.len() + self.routes.iter().map(|r| r.handlers.len()).sum::<usize>()
    }

    /// Adds `handler` under `key`, or to the catch-all list when `key` is
    /// `None`.
    pub fn add_handler(&mut self, handler: Handler, key: Option<RouteKey>) -> RouterResult<()> {
        let Some(key) = key else {
            insert_sorted(&mut self.catch_all, handler);
            return Ok(());
        };

        let (key, regex) = match (self.mode, key) {
            (MatchMode::Regex, RouteKey::Text(source)) => {
                let regex = Regex::new(&source)?;
                (source, Some(regex))
            }
            (MatchMode::Regex, RouteKey::Pattern(regex)) => (regex.as_str().to_string(), Some(regex)),
            (MatchMode::Prefix, RouteKey::Text(prefix)) => (fold_case(&prefix), None),
            (_, RouteKey::Text(text)) => (text, None),
            (_, RouteKey::Pattern(_)) => {
                return Err(RouterError::UnsupportedKey {
                    kind: self.kind(),
                    key: "pattern",
                });
            }
            (_, RouteKey::Shape(_)) => {
                return Err(RouterError::UnsupportedKey {
                    kind: self.kind(),
                    key: "payload",
                });
            }
        };

        match self.routes.iter_mut().find(|r| r.key == key) {
            Some(route) => insert_sorted(&mut route.handlers, handler),
            None => self.routes.push(Route {
                key,
                regex,
                handlers: vec![handler],
            }),
        }
        Ok(())
    }

    pub(crate) fn merge(&mut self, other: &MapRouter) {
        for theirs in &other.routes {
            match self.routes.iter_mut().find(|r| r.key == theirs.key) {
                Some(ours) => {
                    ours.handlers.extend(theirs.handlers.iter().cloned());
                    sort_handlers(&mut ours.handlers);
                }
                None => self.routes.push(theirs.clone()),
            }
        }
        self.catch_all.extend(other.catch_all.iter().cloned());
        sort_handlers(&mut self.catch_all);
    }

    pub(crate) fn for_each_list_mut(&mut self, mut f: impl FnMut(&mut Vec<Handler>)) {
        for route in &mut self.routes {
            f(&mut route.handlers);
        }
        f(&mut self.catch_all);
    }

    pub(crate) fn select(&self, update: &Update) -> Option<Selection<'_>> {
        let message = update.as_message()?;
        if self.mode == MatchMode::Attachment && message.attachments.is_empty() {
            return None;
        }

        let mut selection = Selection::default();
        let mut matched = false;
        for route in &self.routes {
            if let Some(captures) = self.match_route(route, message) {
                selection.push(&route.handlers, captures);
                matched = true;
            }
        }
        if !matched || self.mode == MatchMode::Attachment {
            selection.push(&self.catch_all, Map::new());
        }
        Some(selection)
    }

    fn match_route(&self, route: &Route, message: &Message) -> Option<Map<String, Value>> {
        let text = message.text.as_str();
        match self.mode {
            MatchMode::Exact => (text == route.key).then(Map::new),
            MatchMode::Prefix => {
                let body = strip_prefix_folded(text, &route.key)?.trim();
                let args: Vec<Value> = body
                    .split_whitespace()
                    .map(|s| Value::String(s.to_string()))
                    .collect();

                let mut captures = Map::new();
                captures.insert("body".into(), Value::String(body.to_string()));
                captures.insert("args".into(), Value::Array(args));
                Some(captures)
            }
            MatchMode::Regex => {
                let regex = route.regex.as_ref()?;
                let caps = regex.captures(text)?;
                if caps.get(0)?.start() != 0 {
                    return None;
                }
                let groups: Vec<Value> = caps
                    .iter()
                    .map(|g| g.map_or(Value::Null, |m| Value::String(m.as_str().to_string())))
                    .collect();

                let mut captures = Map::new();
                captures.insert("match".into(), Value::Array(groups));
                Some(captures)
            }
            MatchMode::Attachment => message
                .attachments
                .iter()
                .any(|a| a.kind == route.key)
                .then(Map::new),
        }
    }
}

/// Lower-cases char by char, the same folding [`strip_prefix_folded`] applies
/// to message text.
fn fold_case(text: &str) -> String {
    text.chars().flat_map(char::to_lowercase).collect()
}

/// Strips `prefix` (already folded) from `text`, comparing each char of
/// `text` by its lower-cased form. Returns the rest of the original text.
fn strip_prefix_folded<'t>(text: &'t str, prefix: &str) -> Option<&'t str> {
    let mut rest = prefix;
    for (idx, ch) in text.char_indices() {
        if rest.is_empty() {
            return Some(&text[idx..]);
        }
        let mut buf = [0u8; 4];
        for lower in ch.to_lowercase() {
            rest = rest.strip_prefix(&*lower.encode_utf8(&mut buf))?;
        }
    }
    rest.is_empty().then_some("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Attachment;
    use serde_json::json;

    fn noop() -> Handler {
        Handler::new(|_u, _e| async {})
    }

    fn msg(text: &str) -> Update {
        Message::text(text).into()
    }

    #[test]
    fn test_exact_is_case_sensitive() {
        let mut r = MapRouter::new(MatchMode::Exact);
        let h = noop();
        r.add_handler(h.clone(), Some("ping".into())).unwrap();

        let sel = r.select(&msg("ping")).unwrap();
        assert!(sel.handlers().next().unwrap().ptr_eq(&h));
        assert!(r.select(&msg("PING")).unwrap().is_empty());
    }

    #[test]
    fn test_prefix_sets_body_and_args() {
        let mut r = MapRouter::new(MatchMode::Prefix);
        r.add_handler(noop(), Some(".Echo".into())).unwrap();

        let sel = r.select(&msg(".ECHO  hello   there ")).unwrap();
        assert_eq!(sel.len(), 1);
        let captures = &sel.groups()[0].captures;
        assert_eq!(captures["body"], json!("hello   there"));
        assert_eq!(captures["args"], json!(["hello", "there"]));
    }

    #[test]
    fn test_prefix_cut_follows_original_text() {
        let mut r = MapRouter::new(MatchMode::Prefix);
        r.add_handler(noop(), Some("İ".into())).unwrap();

        let sel = r.select(&msg("İhello")).unwrap();
        assert_eq!(sel.len(), 1);
        assert_eq!(sel.groups()[0].captures["body"], json!("hello"));

        let sel = r.select(&msg("ihello")).unwrap();
        assert!(sel.is_empty());
    }

    #[test]
    fn test_regex_is_anchored_and_captures_groups() {
        let mut r = MapRouter::new(MatchMode::Regex);
        r.add_handler(noop(), Some(r"roll (\d+)(d)?".into())).unwrap();

        let sel = r.select(&msg("roll 20 please")).unwrap();
        assert_eq!(sel.groups()[0].captures["match"], json!(["roll 20", "20", null]));

        let sel = r.select(&msg("please roll 20")).unwrap();
        assert!(sel.is_empty());
        assert!(sel.groups().iter().all(|g| g.captures.is_empty()));
    }

    #[test]
    fn test_every_matching_key_in_registration_order() {
        let mut r = MapRouter::new(MatchMode::Prefix);
        let first = noop();
        let second = noop();
        let fallback = noop();
        r.add_handler(first.clone(), Some("!".into())).unwrap();
        r.add_handler(second.clone(), Some("!help".into())).unwrap();
        r.add_handler(fallback, None).unwrap();

        let sel = r.select(&msg("!help me")).unwrap();
        assert_eq!(sel.groups().len(), 2);
        let picked: Vec<&Handler> = sel.handlers().collect();
        assert!(picked[0].ptr_eq(&first));
        assert!(picked[1].ptr_eq(&second));
        assert_eq!(sel.groups()[0].captures["body"], json!("help me"));
        assert_eq!(sel.groups()[1].captures["body"], json!("me"));
        assert_eq!(r.keys().collect::<Vec<_>>(), vec!["!", "!help"]);
    }

    #[test]
    fn test_catch_all_runs_without_match() {
        let mut r = MapRouter::new(MatchMode::Exact);
        let fallback = noop();
        r.add_handler(noop(), Some("a".into())).unwrap();
        r.add_handler(fallback.clone(), None).unwrap();

        let sel = r.select(&msg("b")).unwrap();
        assert_eq!(sel.len(), 1);
        assert!(sel.handlers().next().unwrap().ptr_eq(&fallback));

        let sel = r.select(&msg("a")).unwrap();
        assert!(sel.handlers().all(|h| !h.ptr_eq(&fallback)));
        assert!(r.select(&Update::Raw(Value::Null)).is_none());
    }

    #[test]
    fn test_attachment_catch_all_runs_for_any_attachment() {
        let mut r = MapRouter::new(MatchMode::Attachment);
        let any = noop();
        let photo = noop();
        r.add_handler(any.clone(), None).unwrap();
        r.add_handler(photo.clone(), Some("photo".into())).unwrap();

        assert!(r.select(&msg("no media")).is_none());

        let with_photo = Message::text("").with_attachment(Attachment::new("photo"));
        let picked: Vec<Handler> = r.select(&with_photo.into()).unwrap().handlers().cloned().collect();
        assert_eq!(picked.len(), 2);
        assert!(picked[0].ptr_eq(&photo));
        assert!(picked[1].ptr_eq(&any));

        let with_audio = Message::text("").with_attachment(Attachment::new("audio"));
        let sel = r.select(&with_audio.into()).unwrap();
        assert_eq!(sel.len(), 1);
        assert!(sel.handlers().next().unwrap().ptr_eq(&any));
    }

    #[test]
    fn test_each_attachment_kind_matches() {
        let mut r = MapRouter::new(MatchMode::Attachment);
        let audio = noop();
        let photo = noop();
        r.add_handler(audio.clone(), Some("audio".into())).unwrap();
        r.add_handler(photo.clone(), Some("photo".into())).unwrap();

        let both = Message::text("")
            .with_attachment(Attachment::new("photo"))
            .with_attachment(Attachment::new("audio"));
        let sel = r.select(&both.into()).unwrap();
        let picked: Vec<&Handler> = sel.handlers().collect();
        assert_eq!(picked.len(), 2);
        assert!(picked[0].ptr_eq(&audio));
        assert!(picked[1].ptr_eq(&photo));
    }

    #[test]
    fn test_merge_per_key_and_one_sided_keys() {
        let mut a = MapRouter::new(MatchMode::Exact);
        a.add_handler(noop().priority(1), Some("x".into())).unwrap();
        a.add_handler(noop(), None).unwrap();
        let mut b = MapRouter::new(MatchMode::Exact);
        b.add_handler(noop().priority(5), Some("x".into())).unwrap();
        b.add_handler(noop(), Some("y".into())).unwrap();
        b.add_handler(noop(), None).unwrap();

        a.merge(&b);

        let x: Vec<i32> = a.handlers_for("x").unwrap().iter().map(Handler::get_priority).collect();
        assert_eq!(x, vec![5, 1]);
        assert_eq!(a.handlers_for("y").map(<[Handler]>::len), Some(1));
        assert_eq!(a.catch_all().len(), 2);
        assert_eq!(a.handler_count(), 5);
    }

    #[test]
    fn test_pattern_key_rejected_outside_regex_mode() {
        let mut r = MapRouter::new(MatchMode::Exact);
        let res = r.add_handler(noop(), Some(RouteKey::Pattern(Regex::new("a").unwrap())));
        assert!(matches!(res, Err(RouterError::UnsupportedKey { .. })));
    }
}
