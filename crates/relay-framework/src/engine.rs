//! Update engine for the Relay framework.
//!
//! The [`Engine`] turns a set of [`Plugin`]s into one execution plan:
//!
//! 1. Plugins are stably sorted by priority, highest first
//! 2. Routers of the same kind and priority are merged across plugins in that
//!    order, so on equal handler ordering keys the higher plugin runs first
//! 3. Merged routers are ordered by `(priority desc, kind)`
//!
//! Each update then walks the routers in order. Every applicable router runs
//! its selected handlers until one returns [`Flow::Stop`], which ends the
//! whole update.
//!
//! ```rust,ignore
//! let engine = Engine::new(vec![greeter, logger], transport)?;
//! engine.startup().await?;
//! engine.process(Update::Message(Message::text("hi").with_target(42))).await;
//! engine.shutdown().await;
//! ```

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{Instrument, debug, debug_span, error, info, trace};

use relay_core::{DEFAULT_CHUNK_SIZE, Environment, Flow, Transport, Update};

use crate::error::{EngineError, EngineResult};
use crate::plugin::{Plugin, PluginHooks};
use crate::router::{Router, RouterKind, run_chain};

/// Merged routers of all plugins plus their lifecycle hooks.
///
/// # Thread Safety
///
/// `Engine` is `Send + Sync`; [`process`](Self::process) takes `&self` and
/// may run for many updates concurrently. Router tables never change after
/// construction.
pub struct Engine {
    routers: Vec<Router>,
    plugins: Vec<PluginHooks>,
    transport: Arc<dyn Transport>,
    chunk_size: usize,
    started: AtomicBool,
}

impl Engine {
    /// Combines `plugins` into one engine replying through `transport`.
    ///
    /// Fails when two routers of the same kind and priority cannot be merged.
    pub fn new(mut plugins: Vec<Plugin>, transport: Arc<dyn Transport>) -> EngineResult<Self> {
        plugins.sort_by_key(|p| Reverse(p.priority()));

        let mut routers: Vec<Router> = Vec::new();
        let mut hooks = Vec::with_capacity(plugins.len());

        for (scope, plugin) in plugins.into_iter().enumerate() {
            let (plugin_hooks, plugin_routers) = plugin.into_parts();
            for mut router in plugin_routers {
                router.rescope(scope);
                let existing = routers
                    .iter_mut()
                    .find(|r| r.kind() == router.kind() && r.priority() == router.priority());
                match existing {
                    Some(existing) => {
                        existing.merge(&router)?;
                    }
                    None => routers.push(router),
                }
            }
            debug!(plugin = %plugin_hooks.name, scope, "Plugin routers merged");
            hooks.push(plugin_hooks);
        }

        routers.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.kind().cmp(&b.kind()))
        });

        Ok(Self {
            routers,
            plugins: hooks,
            transport,
            chunk_size: DEFAULT_CHUNK_SIZE,
            started: AtomicBool::new(false),
        })
    }

    /// Sets the character limit of one reply message.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Merged routers in execution order.
    pub fn routers(&self) -> &[Router] {
        &self.routers
    }

    /// The first merged router of `kind`.
    pub fn router_for(&self, kind: RouterKind) -> Option<&Router> {
        self.routers.iter().find(|r| r.kind() == kind)
    }

    /// Plugin names in priority order.
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name.as_ref()).collect()
    }

    /// Returns `true` between a successful [`startup`](Self::startup) and
    /// [`shutdown`](Self::shutdown).
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Runs every plugin's startup hooks in priority order.
    ///
    /// The first failure aborts startup and is returned. Calling this again
    /// after a successful startup does nothing.
    pub async fn startup(&self) -> EngineResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("Engine already started");
            return Ok(());
        }

        let env = Environment::root_with_chunk_size(
            Arc::clone(&self.transport),
            None,
            self.chunk_size,
        );
        for plugin in &self.plugins {
            for hook in &plugin.startup {
                if let Err(source) = hook(Arc::clone(&env)).await {
                    self.started.store(false, Ordering::Release);
                    error!(plugin = %plugin.name, error = %source, "Startup hook failed");
                    return Err(EngineError::Startup {
                        plugin: plugin.name.to_string(),
                        source,
                    });
                }
            }
            debug!(plugin = %plugin.name, "Plugin started");
        }

        info!(
            plugins = self.plugins.len(),
            routers = self.routers.len(),
            "Engine started"
        );
        Ok(())
    }

    /// Runs every plugin's dispose hooks in priority order.
    ///
    /// Failures are logged and do not stop the remaining hooks. Does nothing
    /// unless the engine was started.
    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            debug!("Engine not started, skipping dispose hooks");
            return;
        }

        for plugin in &self.plugins {
            for hook in &plugin.dispose {
                if let Err(err) = hook().await {
                    error!(plugin = %plugin.name, error = %err, "Dispose hook failed");
                }
            }
        }
        info!("Engine stopped");
    }

    /// Dispatches one update through every applicable router.
    ///
    /// Returns [`Flow::Stop`] when a handler claimed the update.
    pub async fn process(&self, update: Update) -> Flow {
        let span = debug_span!("process", kind = update.kind_name(), target = ?update.target_id());
        self.dispatch(Arc::new(update)).instrument(span).await
    }

    async fn dispatch(&self, update: Arc<Update>) -> Flow {
        let root = Environment::root_with_chunk_size(
            Arc::clone(&self.transport),
            update.target_id(),
            self.chunk_size,
        );
        // One child per plugin, created on first use.
        let mut scoped: HashMap<usize, Arc<Environment>> = HashMap::new();

        for router in &self.routers {
            let Some(selection) = router.select(&update) else {
                continue;
            };
            if selection.is_empty() {
                continue;
            }

            trace!(
                router = %router.kind(),
                handlers = selection.len(),
                "Router selected handlers"
            );
            let flow = run_chain(selection, &update, |handler| {
                Arc::clone(
                    scoped
                        .entry(handler.scope())
                        .or_insert_with(|| root.spawn()),
                )
            })
            .await;

            if flow.is_stop() {
                debug!(router = %router.kind(), "Update claimed");
                return Flow::Stop;
            }
        }

        Flow::Continue
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("plugins", &self.plugin_names())
            .field("routers", &self.routers.iter().map(Router::kind).collect::<Vec<_>>())
            .field("chunk_size", &self.chunk_size)
            .field("started", &self.is_started())
            .finish()
    }
}
