//! The update loop.
//!
//! [`RelayRuntime`] pulls updates from an [`UpdateSource`] and feeds them to an
//! [`Engine`], several at a time, until the source runs dry or a shutdown is
//! requested. Shutdown stops pulling new updates, lets in-flight ones finish,
//! then runs the plugins' dispose hooks.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use relay_runtime::RelayRuntime;
//!
//! let runtime = RelayRuntime::builder()
//!     .plugin(echo_plugin())
//!     .transport(transport)
//!     .build()?;
//!
//! // Until Ctrl+C / SIGTERM or the source ends
//! runtime.run(source).await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::{Transport, Update};
use relay_framework::{Engine, Plugin};

use crate::config::{ConfigLoader, RelayConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

// =============================================================================
// UpdateSource
// =============================================================================

/// Inbound side of the runtime: long polling, a webhook queue, stdin, a test
/// channel.
///
/// Returning `None` means the source is exhausted and the runtime should stop.
#[async_trait]
pub trait UpdateSource: Send {
    async fn next_update(&mut self) -> Option<Update>;
}

#[async_trait]
impl UpdateSource for mpsc::Receiver<Update> {
    async fn next_update(&mut self) -> Option<Update> {
        self.recv().await
    }
}

#[async_trait]
impl UpdateSource for mpsc::UnboundedReceiver<Update> {
    async fn next_update(&mut self) -> Option<Update> {
        self.recv().await
    }
}

// =============================================================================
// RelayRuntime
// =============================================================================

/// Drives an [`Engine`] with updates from an [`UpdateSource`].
pub struct RelayRuntime {
    config: RelayConfig,
    engine: Arc<Engine>,
    cancel: CancellationToken,
}

impl RelayRuntime {
    /// Creates a runtime from an already loaded configuration.
    ///
    /// Does not initialize logging; [`RuntimeBuilder`] does.
    pub fn new(
        config: RelayConfig,
        plugins: Vec<Plugin>,
        transport: Arc<dyn Transport>,
    ) -> RuntimeResult<Self> {
        config.validate()?;
        let engine =
            Engine::new(plugins, transport)?.with_chunk_size(config.runtime.reply_chunk_size);

        info!(
            plugins = ?engine.plugin_names(),
            routers = engine.routers().len(),
            max_concurrent_updates = config.runtime.max_concurrent_updates,
            "Runtime created"
        );

        Ok(Self {
            config,
            engine: Arc::new(engine),
            cancel: CancellationToken::new(),
        })
    }

    /// Creates a builder that loads configuration from files and the
    /// environment.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs until the source is exhausted, Ctrl+C / SIGTERM, or the
    /// [`shutdown_token`](Self::shutdown_token) is cancelled.
    pub async fn run<S: UpdateSource>(&self, source: S) -> RuntimeResult<()> {
        info!("Relay runtime is now running. Press Ctrl+C to stop.");
        self.run_until(source, wait_for_shutdown()).await
    }

    /// Like [`run`](Self::run) with a custom shutdown future in place of OS
    /// signals.
    ///
    /// A startup hook failure is returned before any update is pulled.
    pub async fn run_until<S, F>(&self, source: S, shutdown: F) -> RuntimeResult<()>
    where
        S: UpdateSource,
        F: Future<Output = ()>,
    {
        self.engine.startup().await?;

        let cancel = self.cancel.clone();
        let stop = async move {
            tokio::select! {
                _ = shutdown => info!("Shutdown requested"),
                _ = cancel.cancelled() => info!("Runtime cancelled"),
            }
        };

        let limit = self.config.runtime.max_concurrent_updates.max(1);
        let engine = &self.engine;
        let mut pulled = 0usize;

        stream::unfold(source, |mut source| async move {
            source.next_update().await.map(|update| (update, source))
        })
        .take_until(stop)
        .for_each_concurrent(limit, |update| {
            pulled += 1;
            async move {
                engine.process(update).await;
            }
        })
        .await;

        info!(updates = pulled, "Update loop finished");
        self.engine.shutdown().await;
        Ok(())
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(err) => warn!(error = %err, "Failed to register SIGTERM handler"),
        }
    }

    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`RelayRuntime`] with loaded configuration.
///
/// ```rust,ignore
/// let runtime = RelayRuntime::builder()
///     .config_file("deploy/relay.toml")
///     .profile("production")
///     .plugins(vec![admin, games])
///     .transport(transport)
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    plugins: Vec<Plugin>,
    transport: Option<Arc<dyn Transport>>,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            plugins: Vec::new(),
            transport: None,
            init_logging: true,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: RelayConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Skips installing the global log subscriber.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Plugin>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    /// Sets the outbound transport. Required.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Loads configuration, initializes logging and builds the runtime.
    pub fn build(self) -> RuntimeResult<RelayRuntime> {
        let config = self.config_loader.load()?;
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }
        let transport = self.transport.ok_or(RuntimeError::MissingTransport)?;
        RelayRuntime::new(config, self.plugins, transport)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::testing::{NullTransport, RecordingTransport};
    use relay_core::{Environment, Flow, Message, SendOptions};
    use relay_framework::EngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_plugin(counter: &Arc<AtomicUsize>) -> Plugin {
        let mut plugin = Plugin::new("count");
        let c = Arc::clone(counter);
        plugin.on_any_message().handle(move |_u, _e| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        plugin
    }

    #[tokio::test]
    async fn test_runs_until_source_exhausted() {
        let counter = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));

        let mut plugin = counting_plugin(&counter);
        let d = Arc::clone(&disposed);
        plugin.on_dispose(move || {
            let d = Arc::clone(&d);
            async move {
                d.fetch_add(1, Ordering::SeqCst);
            }
        });

        let runtime =
            RelayRuntime::new(RelayConfig::default(), vec![plugin], NullTransport::shared())
                .unwrap();

        let (tx, rx) = mpsc::channel(8);
        for text in ["a", "b", "c"] {
            tx.send(Update::Message(Message::text(text))).await.unwrap();
        }
        drop(tx);

        runtime
            .run_until(rx, std::future::pending::<()>())
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(!runtime.engine().is_started());
    }

    #[tokio::test]
    async fn test_cancellation_stops_open_source() {
        let counter = Arc::new(AtomicUsize::new(0));
        let runtime = RelayRuntime::new(
            RelayConfig::default(),
            vec![counting_plugin(&counter)],
            NullTransport::shared(),
        )
        .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Update::Message(Message::text("one"))).unwrap();

        let token = runtime.shutdown_token();
        let c = Arc::clone(&counter);
        let canceller = async move {
            while c.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
            token.cancel();
        };

        let (res, ()) = tokio::join!(
            runtime.run_until(rx, std::future::pending::<()>()),
            canceller
        );
        res.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(tx);
    }

    #[tokio::test]
    async fn test_startup_failure_is_returned() {
        let mut plugin = Plugin::new("db");
        plugin.on_startup(|_env| async { Err::<(), _>("connection refused") });

        let runtime =
            RelayRuntime::new(RelayConfig::default(), vec![plugin], NullTransport::shared())
                .unwrap();
        let (_tx, rx) = mpsc::channel::<Update>(1);

        let res = runtime.run_until(rx, async {}).await;
        assert!(matches!(
            res,
            Err(RuntimeError::Engine(EngineError::Startup { .. }))
        ));
    }

    #[tokio::test]
    async fn test_chunk_size_comes_from_config() {
        let transport = RecordingTransport::shared();
        let mut plugin = Plugin::new("long");
        plugin
            .on_any_message()
            .handle(|_u, env: Arc<Environment>| async move {
                env.reply(&"x".repeat(25), SendOptions::default()).await;
                Flow::Stop
            });

        let mut config = RelayConfig::default();
        config.runtime.reply_chunk_size = 10;
        let runtime = RelayRuntime::new(config, vec![plugin], transport.clone()).unwrap();

        let (tx, rx) = mpsc::channel(1);
        tx.send(Update::Message(Message::text("go").with_target(3)))
            .await
            .unwrap();
        drop(tx);
        runtime.run_until(rx, std::future::pending::<()>()).await.unwrap();

        let lengths: Vec<usize> = transport.sent_texts().iter().map(String::len).collect();
        assert_eq!(lengths, vec![10, 10, 5]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RelayConfig::default();
        config.runtime.max_concurrent_updates = 0;
        let res = RelayRuntime::new(config, Vec::new(), NullTransport::shared());
        assert!(matches!(res, Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_builder_requires_transport() {
        let res = RelayRuntime::builder()
            .search_path("/nonexistent-relay-config")
            .without_env()
            .without_logging()
            .build();
        assert!(matches!(res, Err(RuntimeError::MissingTransport)));
    }
}
