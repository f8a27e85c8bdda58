//! Outbound transport boundary.
//!
//! The dispatch core never talks HTTP itself. An [`Environment`] delegates
//! every send, raw request and upload step to a [`Transport`] implementation
//! supplied by the application (a platform client, a console sink, a test
//! double).
//!
//! [`Environment`]: crate::Environment

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::TransportResult;
use crate::update::Attachment;

/// Optional extras accompanying an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SendOptions {
    /// Attachments to send with the message.
    pub attachments: Vec<Attachment>,
    /// Sticker to send.
    pub sticker_id: Option<i64>,
    /// Structured payload.
    pub payload: Option<Value>,
    /// Keyboard markup.
    pub keyboard: Option<Value>,
    /// Identifiers of messages to forward.
    pub forward_messages: Vec<i64>,
}

impl SendOptions {
    /// Adds an attachment.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Sets the sticker.
    pub fn sticker(mut self, sticker_id: i64) -> Self {
        self.sticker_id = Some(sticker_id);
        self
    }

    /// Sets the payload.
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the keyboard.
    pub fn keyboard(mut self, keyboard: Value) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    /// Adds a message to forward.
    pub fn forward(mut self, message_id: i64) -> Self {
        self.forward_messages.push(message_id);
        self
    }
}

/// What is being uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadKind {
    /// A photo for a message.
    Photo,
    /// A document; `doctype` is the platform's document type (`"doc"`,
    /// `"audio_message"`, ...).
    Doc {
        /// Platform document type.
        doctype: String,
    },
}

impl UploadKind {
    /// Attachment type produced by this upload.
    pub fn attachment_kind(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Doc { .. } => "doc",
        }
    }
}

/// Where an upload is destined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    /// A conversation.
    Messages {
        /// The conversation, or `None` for the transport's default.
        peer_id: Option<i64>,
    },
    /// A community wall.
    Wall {
        /// The community, or `None` for the transport's own.
        group_id: Option<i64>,
    },
}

/// A file body handed to [`Transport::post_file`].
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// Multipart field name.
    pub field: &'static str,
    /// File name reported to the server.
    pub filename: Option<String>,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// Source of a file to upload: in-memory bytes or a path on disk.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A path read with `tokio::fs` at upload time.
    Path(PathBuf),
}

impl FileSource {
    /// Loads the file contents.
    pub async fn read(self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Path(path) => tokio::fs::read(path).await,
        }
    }
}

impl From<Vec<u8>> for FileSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for FileSource {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<PathBuf> for FileSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&std::path::Path> for FileSource {
    fn from(path: &std::path::Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

/// The send/reply sink behind every [`Environment`](crate::Environment).
///
/// # Upload protocol
///
/// Uploads are three steps, each a separate method so the environment can
/// treat any empty or failed step as a soft failure:
///
/// 1. [`upload_server`](Self::upload_server) returns an object with an
///    `upload_url` string.
/// 2. [`post_file`](Self::post_file) posts the file there and returns the
///    response body.
/// 3. [`save_upload`](Self::save_upload) registers the uploaded file and
///    returns an array of saved objects.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a message to `target_id`.
    async fn send_message(
        &self,
        target_id: i64,
        text: &str,
        options: &SendOptions,
    ) -> TransportResult<Value>;

    /// Calls a raw API method.
    async fn request(&self, method: &str, params: Value) -> TransportResult<Value>;

    /// Requests an upload server for `kind` and `target`.
    async fn upload_server(&self, kind: &UploadKind, target: &UploadTarget)
    -> TransportResult<Value>;

    /// Posts a file to `upload_url`; `None` means the server sent no body.
    async fn post_file(&self, upload_url: &str, file: FileUpload)
    -> TransportResult<Option<String>>;

    /// Saves a posted file.
    async fn save_upload(&self, kind: &UploadKind, uploaded: Value) -> TransportResult<Value>;

    /// Converts a saved platform object into an [`Attachment`].
    fn convert_attachment(&self, raw: Value, kind: &UploadKind) -> Attachment {
        Attachment::from_raw(kind.attachment_kind(), raw)
    }
}
