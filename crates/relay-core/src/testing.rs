//! In-memory transports for tests and demos.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::error::{TransportError, TransportResult};
use crate::transport::{FileUpload, SendOptions, Transport, UploadKind, UploadTarget};

/// A transport that accepts nothing.
#[derive(Debug, Default)]
pub struct NullTransport;

impl NullTransport {
    /// Returns a shared instance.
    pub fn shared() -> Arc<dyn Transport> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn send_message(&self, _: i64, _: &str, _: &SendOptions) -> TransportResult<Value> {
        Err(TransportError::NotConnected)
    }

    async fn request(&self, _: &str, _: Value) -> TransportResult<Value> {
        Err(TransportError::NotConnected)
    }

    async fn upload_server(&self, _: &UploadKind, _: &UploadTarget) -> TransportResult<Value> {
        Err(TransportError::NotConnected)
    }

    async fn post_file(&self, _: &str, _: FileUpload) -> TransportResult<Option<String>> {
        Err(TransportError::NotConnected)
    }

    async fn save_upload(&self, _: &UploadKind, _: Value) -> TransportResult<Value> {
        Err(TransportError::NotConnected)
    }
}

/// One message captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    /// Destination.
    pub target_id: i64,
    /// Text.
    pub text: String,
    /// Extras.
    pub options: SendOptions,
}

/// Canned responses for the three upload steps.
#[derive(Debug, Clone)]
pub struct UploadScript {
    /// Response of `upload_server`.
    pub server: Value,
    /// Body returned by `post_file`.
    pub body: Option<String>,
    /// Response of `save_upload`.
    pub saved: Value,
}

impl UploadScript {
    /// A script where every step succeeds.
    pub fn ok() -> Self {
        Self {
            server: json!({"upload_url": "https://upload.invalid/"}),
            body: Some(r#"{"server": 1, "hash": "abc"}"#.to_string()),
            saved: json!([{"id": 1, "owner_id": 2}]),
        }
    }
}

#[derive(Debug, Default)]
struct Recorded {
    sent: Vec<SentMessage>,
    requests: Vec<(String, Value)>,
    posted: Vec<FileUpload>,
    upload_targets: Vec<UploadTarget>,
    script: Option<UploadScript>,
}

/// A transport that records every call and answers from a script.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    inner: Mutex<Recorded>,
}

impl RecordingTransport {
    /// Creates a shared recorder.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sets the upload script.
    pub fn script_upload(&self, script: UploadScript) {
        self.inner.lock().script = Some(script);
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.inner.lock().sent.clone()
    }

    /// Texts sent so far.
    pub fn sent_texts(&self) -> Vec<String> {
        self.inner.lock().sent.iter().map(|m| m.text.clone()).collect()
    }

    /// Raw requests made so far.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.inner.lock().requests.clone()
    }

    /// Files posted so far.
    pub fn posted(&self) -> Vec<FileUpload> {
        self.inner.lock().posted.clone()
    }

    /// Targets passed to `upload_server` so far.
    pub fn upload_targets(&self) -> Vec<UploadTarget> {
        self.inner.lock().upload_targets.clone()
    }

    fn script(&self) -> TransportResult<UploadScript> {
        self.inner
            .lock()
            .script
            .clone()
            .ok_or_else(|| TransportError::Other("no upload script".into()))
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(
        &self,
        target_id: i64,
        text: &str,
        options: &SendOptions,
    ) -> TransportResult<Value> {
        let mut inner = self.inner.lock();
        inner.sent.push(SentMessage {
            target_id,
            text: text.to_string(),
            options: options.clone(),
        });
        Ok(json!(inner.sent.len()))
    }

    async fn request(&self, method: &str, params: Value) -> TransportResult<Value> {
        self.inner
            .lock()
            .requests
            .push((method.to_string(), params));
        Ok(json!({"response": 1}))
    }

    async fn upload_server(&self, _: &UploadKind, target: &UploadTarget) -> TransportResult<Value> {
        self.inner.lock().upload_targets.push(*target);
        Ok(self.script()?.server)
    }

    async fn post_file(&self, _: &str, file: FileUpload) -> TransportResult<Option<String>> {
        self.inner.lock().posted.push(file);
        Ok(self.script()?.body)
    }

    async fn save_upload(&self, _: &UploadKind, _: Value) -> TransportResult<Value> {
        Ok(self.script()?.saved)
    }
}
