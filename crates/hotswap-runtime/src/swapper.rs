//! Publishing generations
//!
//! [`PluginManagerSwapper`] owns the one "current" generation. Loads and
//! reloads are serialized by a mutex; readers go through [`current`] without
//! taking it. A superseded generation is released only after the free delay
//! has passed, on a detached thread that outlives the caller and any async
//! runtime it runs in.
//!
//! [`current`]: PluginManagerSwapper::current

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use hotswap_kernel::{HookResult, InitData};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{Span, error, info};

use crate::error::{HotswapError, HotswapResult};
use crate::hook::invoke_hook;
use crate::loader::{Artifact, ArtifactLoader, NativeLoader, plugin_name, scan_plugin_dir};
use crate::manager::{
    Checkpoint, ExtensionFactory, FaultInjector, ManagerContext, OpenObserver, PluginManager,
};
use crate::plugin::{Note, Plugin, name_key};
use crate::static_plugin::{StaticRegistry, check_whitelist};

/// Lower bound of the delay before a superseded generation is released.
pub const MIN_FREE_DELAY: Duration = Duration::from_secs(15);

/// Default delay before a superseded generation is released.
pub const DEFAULT_FREE_DELAY: Duration = Duration::from_secs(5 * 60);

/// Runs after a generation loads, with the new and the superseded
/// generation. An error aborts the load.
pub type ReloadCallback =
    Arc<dyn Fn(&PluginManager, Option<&PluginManager>) -> HookResult + Send + Sync>;

/// Where plugins come from.
#[derive(Debug, Clone)]
pub enum PluginSource {
    /// Native artifacts in a directory
    Directory(PathBuf),
    /// Plugins compiled into the host; never reloadable
    Static(StaticRegistry),
}

/// Swapper configuration
#[derive(Clone)]
pub struct SwapperConfig {
    /// Plugin source
    pub source: PluginSource,
    /// Span every lifecycle event is logged under
    pub span: Span,
    /// Factory of the per-generation vault extension
    pub new_extension: Option<ExtensionFactory>,
    /// Callback run after every load and reload
    pub reload_callback: Option<ReloadCallback>,
    /// Delay before a superseded generation is released
    pub free_delay: Duration,
    /// Names of the plugins to load; empty loads everything
    pub whitelist: Vec<String>,
    /// Opens artifacts of a directory source
    pub loader: Arc<dyn ArtifactLoader>,
    pub fault_injector: Option<FaultInjector>,
    pub open_observer: Option<OpenObserver>,
}

impl SwapperConfig {
    /// Load native plugins from `plugin_dir`.
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self::with_source(PluginSource::Directory(plugin_dir.into()))
    }

    /// Load compiled-in plugins.
    pub fn from_static(registry: StaticRegistry) -> Self {
        Self::with_source(PluginSource::Static(registry))
    }

    fn with_source(source: PluginSource) -> Self {
        Self {
            source,
            span: Span::none(),
            new_extension: None,
            reload_callback: None,
            free_delay: DEFAULT_FREE_DELAY,
            whitelist: Vec::new(),
            loader: Arc::new(NativeLoader::new()),
            fault_injector: None,
            open_observer: None,
        }
    }

    /// Set the span used as logger sink
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Set the vault extension factory
    pub fn with_extension<F, E>(mut self, factory: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        self.new_extension = Some(Arc::new(move || {
            Box::new(factory()) as Box<dyn Any + Send + Sync>
        }));
        self
    }

    /// Set the reload callback
    pub fn with_reload_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PluginManager, Option<&PluginManager>) -> HookResult + Send + Sync + 'static,
    {
        self.reload_callback = Some(Arc::new(callback));
        self
    }

    /// Set the delay before a superseded generation is released
    pub fn with_free_delay(mut self, delay: Duration) -> Self {
        self.free_delay = delay;
        self
    }

    /// Set the load whitelist
    pub fn with_whitelist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the artifact loader
    pub fn with_loader<L: ArtifactLoader + 'static>(mut self, loader: L) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    /// Set the fault injector
    pub fn with_fault_injector<F>(mut self, inject: F) -> Self
    where
        F: Fn(Checkpoint, &InitData) + Send + Sync + 'static,
    {
        self.fault_injector = Some(Arc::new(inject));
        self
    }

    /// Set the observer of freshly opened plugins
    pub fn with_open_observer<F>(mut self, observe: F) -> Self
    where
        F: Fn(&Plugin, &InitData) + Send + Sync + 'static,
    {
        self.open_observer = Some(Arc::new(observe));
        self
    }

    /// The configured delay, floored at [`MIN_FREE_DELAY`].
    pub fn effective_free_delay(&self) -> Duration {
        self.free_delay.max(MIN_FREE_DELAY)
    }

    fn manager_context(&self) -> ManagerContext {
        ManagerContext {
            span: self.span.clone(),
            loader: self.loader.clone(),
            new_extension: self.new_extension.clone(),
            fault_injector: self.fault_injector.clone(),
            on_open: self.open_observer.clone(),
        }
    }
}

impl fmt::Debug for SwapperConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapperConfig")
            .field("source", &self.source)
            .field("free_delay", &self.free_delay)
            .field("whitelist", &self.whitelist)
            .field("has_reload_callback", &self.reload_callback.is_some())
            .finish()
    }
}

/// Outcome of a load: the note of every plugin, keyed by artifact path (or by
/// plugin name in static mode).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Details(BTreeMap<String, Note>);

impl Details {
    fn of(manager: &PluginManager) -> Self {
        Self(
            manager
                .plugins()
                .iter()
                .map(|p| {
                    let key = match p.file() {
                        Some(file) => file.display().to_string(),
                        None => p.name().to_string(),
                    };
                    (key, p.note())
                })
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<Note> {
        self.0.get(key).copied()
    }

    /// Note of the plugin called `name`, whatever its key.
    pub fn note_of(&self, name: &str) -> Option<Note> {
        let wanted = name_key(name);
        self.0
            .iter()
            .find(|(k, _)| name_key(&plugin_name(Path::new(k))) == wanted)
            .map(|(_, note)| *note)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Note)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Details {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, note)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", plugin_name(Path::new(key)), note)?;
        }
        Ok(())
    }
}

/// Owns the current generation and swaps it on reload.
pub struct PluginManagerSwapper {
    config: SwapperConfig,
    current: ArcSwapOption<PluginManager>,
    reload_counter: AtomicI64,
    lock: Mutex<()>,
}

impl PluginManagerSwapper {
    pub fn new(config: SwapperConfig) -> Self {
        Self {
            config,
            current: ArcSwapOption::empty(),
            reload_counter: AtomicI64::new(0),
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SwapperConfig {
        &self.config
    }

    pub fn is_static(&self) -> bool {
        matches!(self.config.source, PluginSource::Static(_))
    }

    /// The published generation, `None` before the first successful load.
    pub fn current(&self) -> Option<Arc<PluginManager>> {
        self.current.load_full()
    }

    /// Number of successful reloads, not counting the first load.
    pub fn reload_counter(&self) -> i64 {
        self.reload_counter.load(Ordering::Acquire)
    }

    /// Perform the first load.
    pub fn load_plugins(&self, data: &InitData) -> HotswapResult<Details> {
        let _guard = self.lock.lock();
        let _entered = self.config.span.enter();
        if self.current.load().is_some() {
            return Err(HotswapError::AlreadyLoaded);
        }

        let callbacks = self.callbacks(None);
        match &self.config.source {
            PluginSource::Directory(dir) => self.load_directory(dir, data, &callbacks),
            PluginSource::Static(registry) => self.load_static(registry, data, &callbacks),
        }
    }

    /// Diff the plugin directory against the current generation and swap.
    pub fn reload(&self, data: &InitData) -> HotswapResult<Details> {
        self.reload_impl(data, None)
    }

    /// Like [`reload`](Self::reload), running `callback` after the configured
    /// one.
    pub fn reload_with_callback<F>(&self, data: &InitData, callback: F) -> HotswapResult<Details>
    where
        F: Fn(&PluginManager, Option<&PluginManager>) -> HookResult + Send + Sync + 'static,
    {
        self.reload_impl(data, Some(Arc::new(callback)))
    }

    fn reload_impl(
        &self,
        data: &InitData,
        extra: Option<ReloadCallback>,
    ) -> HotswapResult<Details> {
        let PluginSource::Directory(dir) = &self.config.source else {
            return Err(HotswapError::StaticMode);
        };

        let _guard = self.lock.lock();
        let _entered = self.config.span.enter();
        let callbacks = self.callbacks(extra);
        let details = self.load_directory(dir, data, &callbacks)?;
        self.reload_counter.fetch_add(1, Ordering::AcqRel);
        Ok(details)
    }

    fn callbacks(&self, extra: Option<ReloadCallback>) -> Vec<ReloadCallback> {
        self.config
            .reload_callback
            .iter()
            .cloned()
            .chain(extra)
            .collect()
    }

    fn load_directory(
        &self,
        dir: &Path,
        data: &InitData,
        callbacks: &[ReloadCallback],
    ) -> HotswapResult<Details> {
        let mut files = scan_plugin_dir(dir)?;
        if !self.config.whitelist.is_empty() {
            let names: Vec<String> = files.iter().map(|f| plugin_name(f)).collect();
            check_whitelist(&self.config.whitelist, names.iter().map(String::as_str))?;
            let wanted: BTreeSet<String> =
                self.config.whitelist.iter().map(|w| name_key(w)).collect();
            files.retain(|f| wanted.contains(&name_key(&plugin_name(f))));
        }
        if files.is_empty() {
            return Err(HotswapError::NoPlugins(dir.display().to_string()));
        }
        let artifacts = files
            .iter()
            .map(Artifact::read)
            .collect::<HotswapResult<Vec<_>>>()?;

        let previous = self.current.load_full();
        let mut manager = PluginManager::new(self.config.manager_context());
        manager.load_artifacts(artifacts, previous.as_deref(), data)?;
        self.publish(manager, previous, callbacks)
    }

    fn load_static(
        &self,
        registry: &StaticRegistry,
        data: &InitData,
        callbacks: &[ReloadCallback],
    ) -> HotswapResult<Details> {
        let plugins = registry.select(&self.config.whitelist)?;
        if plugins.is_empty() {
            return Err(HotswapError::NoPlugins("the static registry".to_string()));
        }
        let mut manager = PluginManager::new(self.config.manager_context());
        manager.load_static(plugins, data)?;
        self.publish(manager, None, callbacks)
    }

    /// Run the callbacks, then make `manager` current and schedule the
    /// release of `previous`.
    fn publish(
        &self,
        manager: PluginManager,
        previous: Option<Arc<PluginManager>>,
        callbacks: &[ReloadCallback],
    ) -> HotswapResult<Details> {
        for callback in callbacks {
            let res = invoke_hook(None, "reload callback", || {
                callback(&manager, previous.as_deref())
            })
            .and_then(|r| r.map_err(HotswapError::Callback));
            if let Err(e) = res {
                manager.release();
                return Err(e);
            }
        }

        let details = Details::of(&manager);
        info!("<hotswap> generation {} loaded: {}", manager.generation(), details);
        self.current.store(Some(Arc::new(manager)));
        if let Some(previous) = previous {
            self.schedule_release(previous);
        }
        Ok(details)
    }

    fn schedule_release(&self, old: Arc<PluginManager>) {
        let delay = self.config.effective_free_delay();
        let span = self.config.span.clone();
        info!(
            "<hotswap> generation {} will be released in {:?}",
            old.generation(),
            delay
        );

        let spawned = std::thread::Builder::new()
            .name("hotswap-release".to_string())
            .spawn(move || {
                std::thread::sleep(delay);
                span.in_scope(|| old.release());
            });
        if let Err(e) = spawned {
            error!("<hotswap> failed to schedule the release of a generation: {}", e);
        }
    }
}

impl fmt::Debug for PluginManagerSwapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManagerSwapper")
            .field("config", &self.config)
            .field("current", &self.current().map(|m| m.generation().to_string()))
            .field("reload_counter", &self.reload_counter())
            .finish()
    }
}
