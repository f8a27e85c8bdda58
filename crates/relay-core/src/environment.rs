//! Per-dispatch environments.
//!
//! An [`Environment`] is created for every in-flight update and dropped once
//! the update resolves. It carries:
//!
//! - a `meta` map (string keys, JSON values) owned exclusively by this
//!   environment,
//! - a weak reference to the environment it was [spawned](Environment::spawn)
//!   from,
//! - the reply destination and the [`Transport`] used for sending.
//!
//! Lookups never fall through to the parent. Code that wants shared data
//! reaches through [`parent`](Environment::parent) explicitly:
//!
//! ```rust,ignore
//! async fn tag(update: Arc<Update>, env: Arc<Environment>) {
//!     env.set_meta("local", json!(1));            // only this plugin sees it
//!     if let Some(root) = env.parent() {
//!         root.set_meta("shared", json!(true));   // every plugin can read it
//!     }
//! }
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};
use crate::transport::{FileSource, FileUpload, SendOptions, Transport, UploadKind, UploadTarget};
use crate::update::Attachment;

/// Default maximum number of characters per outgoing message.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Why an upload produced no attachment.
///
/// Uploads are soft failures: [`Environment::upload_photo`] and
/// [`Environment::upload_doc`] log this value and return `None`.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The file could not be read.
    #[error("failed to read file: {0}")]
    Read(#[from] std::io::Error),
    /// A transport step failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The upload server response had no `upload_url`.
    #[error("upload server response has no upload_url")]
    NoUploadUrl,
    /// The file post returned an empty body, invalid JSON, or an `error` field.
    #[error("upload rejected: {0}")]
    Rejected(String),
    /// The save step returned nothing.
    #[error("save step returned no attachments")]
    NothingSaved,
}

/// Mutable per-update context handed to handlers.
pub struct Environment {
    transport: Arc<dyn Transport>,
    parent: Option<Weak<Environment>>,
    target_id: Option<i64>,
    chunk_size: usize,
    meta: Mutex<Map<String, Value>>,
}

impl Environment {
    /// Creates a root environment replying to `target_id`.
    pub fn root(transport: Arc<dyn Transport>, target_id: Option<i64>) -> Arc<Self> {
        Self::root_with_chunk_size(transport, target_id, DEFAULT_CHUNK_SIZE)
    }

    /// Creates a root environment with a custom reply chunk size.
    pub fn root_with_chunk_size(
        transport: Arc<dyn Transport>,
        target_id: Option<i64>,
        chunk_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            parent: None,
            target_id,
            chunk_size: chunk_size.max(1),
            meta: Mutex::new(Map::new()),
        })
    }

    /// Creates a child environment with empty `meta`, the same transport and
    /// reply destination, and a weak back-reference to `self`.
    pub fn spawn(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            transport: Arc::clone(&self.transport),
            parent: Some(Arc::downgrade(self)),
            target_id: self.target_id,
            chunk_size: self.chunk_size,
            meta: Mutex::new(Map::new()),
        })
    }

    /// Returns the parent environment while it is still alive.
    pub fn parent(&self) -> Option<Arc<Environment>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Returns the reply destination.
    pub fn target_id(&self) -> Option<i64> {
        self.target_id
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ─── Meta ────────────────────────────────────────────────────────────────

    /// Returns a clone of the value stored under `key`.
    pub fn get_meta(&self, key: &str) -> Option<Value> {
        self.meta.lock().get(key).cloned()
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn set_meta(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.meta.lock().insert(key.into(), value)
    }

    /// Removes and returns the value under `key`.
    pub fn remove_meta(&self, key: &str) -> Option<Value> {
        self.meta.lock().remove(key)
    }

    /// Returns `true` if `key` is present locally.
    pub fn has_meta(&self, key: &str) -> bool {
        self.meta.lock().contains_key(key)
    }

    /// Inserts every entry of `entries`, overwriting existing keys.
    pub fn extend_meta(&self, entries: &Map<String, Value>) {
        let mut meta = self.meta.lock();
        for (key, value) in entries {
            meta.insert(key.clone(), value.clone());
        }
    }

    /// Runs `f` with exclusive access to the meta map.
    pub fn with_meta<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.meta.lock())
    }

    /// Returns a copy of the meta map.
    pub fn meta_snapshot(&self) -> Map<String, Value> {
        self.meta.lock().clone()
    }

    // ─── Outbound ────────────────────────────────────────────────────────────

    /// Proxies a raw API request to the transport.
    pub async fn request(&self, method: &str, params: Value) -> TransportResult<Value> {
        self.transport.request(method, params).await
    }

    /// Sends `text` to an explicit target.
    pub async fn send_message(
        &self,
        text: &str,
        target_id: i64,
        options: &SendOptions,
    ) -> TransportResult<Value> {
        self.transport.send_message(target_id, text, options).await
    }

    /// Replies to the update being processed.
    ///
    /// Text longer than the chunk size is split into consecutive chunks; all
    /// but the last are sent without extras and the last one carries
    /// `options`. Returns one result per send, in order, or nothing when the
    /// environment has no reply destination.
    pub async fn reply(&self, text: &str, options: SendOptions) -> Vec<TransportResult<Value>> {
        let Some(target) = self.target_id else {
            debug!("reply skipped: environment has no target");
            return Vec::new();
        };

        let chunks = split_chunks(text, self.chunk_size);
        let last = chunks.len() - 1;
        let plain = SendOptions::default();
        let mut results = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.into_iter().enumerate() {
            let opts = if i == last { &options } else { &plain };
            results.push(self.transport.send_message(target, chunk, opts).await);
        }

        results
    }

    // ─── Uploads ─────────────────────────────────────────────────────────────

    /// Uploads a photo for `peer_id` (defaults to this environment's target).
    ///
    /// Returns `None` when any step fails.
    pub async fn upload_photo(
        &self,
        file: impl Into<FileSource>,
        peer_id: Option<i64>,
    ) -> Option<Attachment> {
        let target = UploadTarget::Messages {
            peer_id: peer_id.or(self.target_id),
        };
        let file = file.into();
        self.upload_soft(UploadKind::Photo, target, file, "photo", Some("image.png".into()))
            .await
    }

    /// Uploads a document.
    ///
    /// With no explicit `target`, the document goes to this environment's
    /// conversation, or to the wall when there is none. Returns `None` when
    /// any step fails.
    pub async fn upload_doc(
        &self,
        file: impl Into<FileSource>,
        target: Option<UploadTarget>,
        doctype: &str,
        filename: Option<String>,
    ) -> Option<Attachment> {
        let target = target.unwrap_or(match self.target_id {
            Some(peer) => UploadTarget::Messages {
                peer_id: Some(peer),
            },
            None => UploadTarget::Wall { group_id: None },
        });
        let kind = UploadKind::Doc {
            doctype: doctype.to_string(),
        };
        self.upload_soft(kind, target, file.into(), "file", filename)
            .await
    }

    async fn upload_soft(
        &self,
        kind: UploadKind,
        target: UploadTarget,
        file: FileSource,
        field: &'static str,
        filename: Option<String>,
    ) -> Option<Attachment> {
        match self.upload(&kind, &target, file, field, filename).await {
            Ok(attachment) => Some(attachment),
            Err(err) => {
                warn!(
                    kind = kind.attachment_kind(),
                    error = %err,
                    "Upload failed"
                );
                None
            }
        }
    }

    async fn upload(
        &self,
        kind: &UploadKind,
        target: &UploadTarget,
        file: FileSource,
        field: &'static str,
        filename: Option<String>,
    ) -> Result<Attachment, UploadError> {
        let bytes = file.read().await?;

        let server = self.transport.upload_server(kind, target).await?;
        let upload_url = server
            .get("upload_url")
            .and_then(Value::as_str)
            .ok_or(UploadError::NoUploadUrl)?;

        let body = self
            .transport
            .post_file(
                upload_url,
                FileUpload {
                    field,
                    filename,
                    bytes,
                },
            )
            .await?
            .filter(|body| !body.is_empty())
            .ok_or_else(|| UploadError::Rejected("empty response".into()))?;

        let uploaded: Value = serde_json::from_str(&body)
            .map_err(|e| UploadError::Rejected(format!("invalid JSON: {e}")))?;
        if let Some(error) = uploaded.get("error") {
            return Err(UploadError::Rejected(error.to_string()));
        }
        if is_empty_value(&uploaded) {
            return Err(UploadError::Rejected("empty result".into()));
        }

        let saved = self.transport.save_upload(kind, uploaded).await?;
        let first = match saved {
            Value::Array(items) => items.into_iter().next(),
            _ => None,
        }
        .ok_or(UploadError::NothingSaved)?;

        Ok(self.transport.convert_attachment(first, kind))
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("target_id", &self.target_id)
            .field("has_parent", &self.parent.is_some())
            .field("meta", &*self.meta.lock())
            .finish_non_exhaustive()
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Splits `text` into consecutive pieces of at most `limit` characters.
///
/// Always returns at least one piece, so an empty text is still sent once.
pub fn split_chunks(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == limit {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    chunks.push(&text[start..]);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, UploadScript};
    use serde_json::json;

    #[test]
    fn test_split_chunks_counts_chars() {
        let text = "ж".repeat(5);
        let chunks = split_chunks(&text, 2);
        assert_eq!(chunks, vec!["жж", "жж", "ж"]);
        assert_eq!(split_chunks("", 4096), vec![""]);
        assert_eq!(split_chunks("abcd", 4), vec!["abcd"]);
    }

    #[test]
    fn test_child_meta_is_isolated() {
        let root = Environment::root(RecordingTransport::shared(), Some(1));
        let child = root.spawn();

        child.set_meta("A", json!("A"));
        assert!(!root.has_meta("A"));

        child.parent().unwrap().set_meta("B", json!("B"));
        assert_eq!(root.get_meta("B"), Some(json!("B")));
        assert!(!child.has_meta("B"));
        assert_eq!(child.target_id(), Some(1));
    }

    #[test]
    fn test_parent_reference_is_weak() {
        let root = Environment::root(RecordingTransport::shared(), None);
        let child = root.spawn();
        drop(root);
        assert!(child.parent().is_none());
    }

    #[tokio::test]
    async fn test_reply_splits_long_text() {
        let transport = RecordingTransport::shared();
        let env = Environment::root(transport.clone(), Some(42));
        let text = "x".repeat(5000);
        let options = SendOptions::default().attachment(Attachment::new("photo"));

        let results = env.reply(&text, options.clone()).await;

        assert_eq!(results.len(), 2);
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text.chars().count(), 4096);
        assert_eq!(sent[0].options, SendOptions::default());
        assert_eq!(sent[1].text.chars().count(), 904);
        assert_eq!(sent[1].options, options);
        assert!(sent.iter().all(|m| m.target_id == 42));
    }

    #[tokio::test]
    async fn test_reply_without_target_sends_nothing() {
        let transport = RecordingTransport::shared();
        let env = Environment::root(transport.clone(), None);
        assert!(env.reply("hi", SendOptions::default()).await.is_empty());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_upload_photo_success() {
        let transport = RecordingTransport::shared();
        transport.script_upload(UploadScript::ok());
        let env = Environment::root(transport.clone(), Some(9));

        let attachment = env.upload_photo(b"png".as_slice(), None).await.unwrap();

        assert_eq!(attachment.kind, "photo");
        assert_eq!(attachment.id, Some(1));
        let posted = transport.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].field, "photo");
        assert_eq!(posted[0].bytes, b"png");
    }

    #[tokio::test]
    async fn test_upload_soft_failures() {
        let cases = [
            UploadScript {
                server: json!({}),
                ..UploadScript::ok()
            },
            UploadScript {
                body: None,
                ..UploadScript::ok()
            },
            UploadScript {
                body: Some(r#"{"error": "too big"}"#.into()),
                ..UploadScript::ok()
            },
            UploadScript {
                saved: json!([]),
                ..UploadScript::ok()
            },
        ];

        for script in cases {
            let transport = RecordingTransport::shared();
            transport.script_upload(script);
            let env = Environment::root(transport, Some(9));
            assert!(env.upload_doc(vec![1, 2], None, "doc", None).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_soft_failure() {
        let transport = RecordingTransport::shared();
        transport.script_upload(UploadScript::ok());
        let env = Environment::root(transport.clone(), Some(9));
        let path = std::path::Path::new("/definitely/not/here.png");
        assert!(env.upload_photo(path, None).await.is_none());
        assert!(transport.posted().is_empty());
    }

    #[tokio::test]
    async fn test_upload_doc_defaults_to_wall_without_target() {
        let transport = RecordingTransport::shared();
        transport.script_upload(UploadScript::ok());
        let env = Environment::root(transport.clone(), None);

        let doc = env
            .upload_doc(vec![0], None, "doc", Some("a.txt".into()))
            .await
            .unwrap();

        assert_eq!(doc.kind, "doc");
        assert_eq!(
            transport.upload_targets(),
            vec![UploadTarget::Wall { group_id: None }]
        );
    }
}
