//! Echo Bot Example
//!
//! A console bot: every line typed on stdin becomes an update, replies are
//! printed to stdout.
//!
//! # Input
//!
//! ```text
//! ping                  -> text router
//! echo hello there      -> prefix router, body = "hello there"
//! roll 20               -> regex router, match = ["roll 20", "20"]
//! {"command": "help"}   -> payload router
//! raw {"type": "join"}  -> raw router
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- --profile development
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use relay::core::{FileUpload, TransportError, TransportResult, UploadKind, UploadTarget};
use relay::prelude::*;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

/// Conversation id given to every console message.
const CONSOLE_PEER: i64 = 1;

#[derive(Debug, Parser)]
#[command(about = "Console echo bot built on Relay")]
struct Args {
    /// Configuration file (defaults to searching for relay.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile.
    #[arg(short, long)]
    profile: Option<String>,
}

// ============================================================================
// Console transport and update source
// ============================================================================

/// Prints outgoing messages to stdout.
struct ConsoleTransport;

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_message(
        &self,
        target_id: i64,
        text: &str,
        options: &SendOptions,
    ) -> TransportResult<Value> {
        println!("[to {target_id}] {text}");
        if let Some(keyboard) = &options.keyboard {
            println!("[to {target_id}] keyboard: {keyboard}");
        }
        Ok(json!(1))
    }

    async fn request(&self, method: &str, params: Value) -> TransportResult<Value> {
        info!(method, %params, "Console transport ignoring request");
        Ok(Value::Null)
    }

    async fn upload_server(&self, _: &UploadKind, _: &UploadTarget) -> TransportResult<Value> {
        Err(TransportError::Other("uploads are not supported on the console".into()))
    }

    async fn post_file(&self, _: &str, _: FileUpload) -> TransportResult<Option<String>> {
        Err(TransportError::Other("uploads are not supported on the console".into()))
    }

    async fn save_upload(&self, _: &UploadKind, _: Value) -> TransportResult<Value> {
        Err(TransportError::Other("uploads are not supported on the console".into()))
    }
}

/// Reads one update per stdin line until EOF.
struct StdinSource {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinSource {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl UpdateSource for StdinSource {
    async fn next_update(&mut self) -> Option<Update> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    return None;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Some(parse_line(line));
        }
    }
}

fn parse_line(line: &str) -> Update {
    if let Some(event) = line.strip_prefix("raw ")
        && let Ok(value) = serde_json::from_str::<Value>(event)
    {
        return Update::Raw(value);
    }
    if line.starts_with('{')
        && let Ok(payload) = serde_json::from_str::<Value>(line)
    {
        return Message::text("")
            .with_payload(payload)
            .with_target(CONSOLE_PEER)
            .into();
    }
    Message::text(line).with_target(CONSOLE_PEER).into()
}

// ============================================================================
// Plugins
// ============================================================================

/// Logs every update before anything else sees it.
fn logging_plugin() -> Plugin {
    let mut plugin = Plugin::new("logging").with_priority(100);

    plugin.register_special().handle(|update, _env| async move {
        match &*update {
            Update::Message(m) => info!(text = %m.text, payload = ?m.payload, "Message"),
            Update::Raw(v) => info!(event = %v, "Raw update"),
        }
        Flow::Continue
    });

    plugin
}

fn commands_plugin() -> Result<Plugin> {
    let mut plugin = Plugin::new("commands");

    plugin.on_text(["ping"]).handle(|_update, env| async move {
        env.reply("pong", SendOptions::default()).await;
        Flow::Stop
    });

    plugin
        .on_startswith_text(["echo"])
        .handle(|_update, env| async move {
            let body = env
                .get_meta("body")
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            env.reply(&body, SendOptions::default()).await;
            Flow::Stop
        });

    plugin
        .on_regex(r"roll (\d+)")?
        .handle(|_update, env| async move {
            let sides = env
                .get_meta("match")
                .and_then(|m| m.get(1).and_then(Value::as_str).map(str::to_owned))
                .unwrap_or_default();
            env.reply(&format!("rolling a d{sides}"), SendOptions::default())
                .await;
            Flow::Stop
        });

    plugin
        .on_payload([json!({"command": ""})])
        .handle(|update, env| async move {
            let command = update
                .as_message()
                .and_then(|m| m.payload.as_ref())
                .and_then(|p| p["command"].as_str().map(str::to_owned))
                .unwrap_or_default();
            let keyboard = json!({"buttons": [[{"label": "ping"}, {"label": "roll 6"}]]});
            let options = SendOptions {
                keyboard: Some(keyboard),
                ..SendOptions::default()
            };
            env.reply(&format!("button pressed: {command}"), options).await;
            Flow::Stop
        });

    plugin
        .on_has_text(["hello", "hi"])
        .handle(|_update, env| async move {
            env.reply("Hello to you too!", SendOptions::default()).await;
            Flow::Stop
        });

    plugin.on_raw().handle(|update, _env| async move {
        if let Some(kind) = update.as_raw().and_then(|v| v["type"].as_str()) {
            info!(kind, "Raw event handled");
        }
        Flow::Stop
    });

    plugin.on_startup(|env| async move {
        env.set_meta("started", json!(true));
        info!("Commands plugin ready");
    });
    plugin.on_dispose(|| async {
        info!("Commands plugin disposed");
    });

    Ok(plugin)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = RelayRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }

    let runtime = builder
        .plugin(logging_plugin())
        .plugin(commands_plugin()?)
        .transport(Arc::new(ConsoleTransport))
        .build()?;

    runtime.run(StdinSource::new()).await?;

    Ok(())
}
