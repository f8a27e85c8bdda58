//! Plugin system for the Relay framework.
//!
//! # Architecture
//!
//! A [`Plugin`] is a named bundle of routers plus lifecycle hooks. Its `on_*`
//! methods are sugar for "build a [`Handler`], insert it into the router for
//! that trigger kind", creating the router on first use:
//!
//! | method | router |
//! |--------|--------|
//! | [`on_text`](Plugin::on_text) | exact text map |
//! | [`on_startswith_text`](Plugin::on_startswith_text) | prefix map |
//! | [`on_regex`](Plugin::on_regex) | pattern map |
//! | [`on_has_text`](Plugin::on_has_text) | messages with text |
//! | [`on_attachment`](Plugin::on_attachment) | attachment-type map |
//! | [`on_any_message`](Plugin::on_any_message) | every message |
//! | [`on_payload`](Plugin::on_payload) | payload shape |
//! | [`on_raw`](Plugin::on_raw) | non-message updates |
//! | [`register_special`](Plugin::register_special) | every update, first |
//!
//! Plugins are handed to an [`Engine`](crate::Engine), which merges routers of
//! the same kind across plugins and runs hooks in plugin-priority order.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use relay::prelude::*;
//!
//! let mut echo = Plugin::new("echo");
//! echo.on_startswith_text(["echo "]).handle(|_update, env| async move {
//!     let body = env.get_meta("body").and_then(|b| b.as_str().map(str::to_owned));
//!     env.reply(&body.unwrap_or_default(), SendOptions::default()).await;
//!     Flow::Stop
//! });
//! ```
//!
//! [`Handler`]: relay_core::Handler

// ─── Submodules ──────────────────────────────────────────────────────────────
mod core;
mod registration;

// ─── Re-exports from submodules ──────────────────────────────────────────────
pub use self::core::{DisposeHook, IntoHookResult, Plugin, StartupHook};
pub(crate) use self::core::PluginHooks;
pub use registration::Registration;
