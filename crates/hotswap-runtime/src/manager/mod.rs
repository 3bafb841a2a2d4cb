//! One generation of plugins
//!
//! A [`PluginManager`] loads a candidate set exactly once: it diffs the
//! candidates against the generation being superseded, instantiates what
//! changed, wires dependencies, runs the load hooks, assembles the [`Vault`]
//! and runs the init hooks. Any failure tears down what was built and leaves
//! the manager in [`ManagerState::Failed`].

mod deps;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use hotswap_kernel::symbol::{LIVE_FUNCS, LIVE_TYPES, ON_INIT, ON_LOAD};
use hotswap_kernel::{InitData, Value, Vault};
use tracing::{Span, debug, error, info, warn};

use crate::error::{HotswapError, HotswapResult};
use crate::hook::{invoke_fallible_hook, invoke_hook};
use crate::loader::{Artifact, ArtifactLoader, Fingerprint, NativeLoader};
use crate::plugin::{LoadedPlugin, Note, Plugin, name_key};
use crate::static_plugin::StaticPlugin;

/// Creates the vault extension of each generation.
pub type ExtensionFactory = Arc<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;

/// Called at fixed points of the load sequence; lets tests inject faults.
pub type FaultInjector = Arc<dyn Fn(Checkpoint, &InitData) + Send + Sync>;

/// Called with every freshly instantiated plugin before its hooks run.
pub type OpenObserver = Arc<dyn Fn(&Plugin, &InitData) + Send + Sync>;

/// Points of the load sequence where the [`FaultInjector`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Every fresh plugin has been instantiated
    Instantiated,
    /// Every init hook has returned
    Initialized,
}

/// Lifecycle of a manager. Only a `Fresh` manager may load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Fresh,
    Loaded,
    Failed,
}

/// Something to load as a plugin.
#[derive(Debug, Clone)]
pub enum Candidate {
    Artifact(Artifact),
    Static(StaticPlugin),
}

impl Candidate {
    pub fn name(&self) -> &str {
        match self {
            Candidate::Artifact(a) => &a.name,
            Candidate::Static(s) => s.name(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Candidate::Artifact(a) => Some(&a.path),
            Candidate::Static(_) => None,
        }
    }

    fn fingerprint(&self) -> Option<Fingerprint> {
        match self {
            Candidate::Artifact(a) => Some(a.fingerprint),
            Candidate::Static(_) => None,
        }
    }
}

/// Collaborators shared by every generation of a swapper.
#[derive(Clone)]
pub(crate) struct ManagerContext {
    pub span: Span,
    pub loader: Arc<dyn ArtifactLoader>,
    pub new_extension: Option<ExtensionFactory>,
    pub fault_injector: Option<FaultInjector>,
    pub on_open: Option<OpenObserver>,
}

impl Default for ManagerContext {
    fn default() -> Self {
        Self {
            span: Span::none(),
            loader: Arc::new(NativeLoader::new()),
            new_extension: None,
            fault_injector: None,
            on_open: None,
        }
    }
}

/// Owns one generation of plugins.
pub struct PluginManager {
    state: ManagerState,
    generation: String,
    loaded_at: DateTime<Local>,
    is_static: bool,
    by_key: BTreeMap<String, LoadedPlugin>,
    ordered: Vec<LoadedPlugin>,
    vault: Vault,
    released: AtomicBool,
    context: ManagerContext,
}

impl PluginManager {
    pub(crate) fn new(context: ManagerContext) -> Self {
        let now = Local::now();
        let extension = context.new_extension.as_ref().map(|f| f());
        Self {
            state: ManagerState::Fresh,
            generation: format!("{}-{}", now.format("%y%m%d%H%M%S"), std::process::id()),
            loaded_at: now,
            is_static: false,
            by_key: BTreeMap::new(),
            ordered: Vec::new(),
            vault: Vault::new(extension),
            released: AtomicBool::new(false),
            context,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Tag naming this generation, `<yymmddHHMMSS>-<pid>`.
    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Local> {
        self.loaded_at
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Find a plugin by name, case-insensitively.
    pub fn find_plugin(&self, name: &str) -> Option<&LoadedPlugin> {
        self.by_key.get(&name_key(name))
    }

    /// Plugins in dependency order.
    pub fn plugins(&self) -> &[LoadedPlugin] {
        &self.ordered
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Call every plugin's invoke entry in dependency order. Failures are
    /// logged and do not stop the fan-out.
    pub fn invoke_each(&self, name: &str, params: &[Value]) {
        for plugin in &self.ordered {
            self.invoke_one(plugin, name, params);
        }
    }

    /// Like [`invoke_each`](Self::invoke_each), in reverse dependency order.
    pub fn invoke_each_backward(&self, name: &str, params: &[Value]) {
        for plugin in self.ordered.iter().rev() {
            self.invoke_one(plugin, name, params);
        }
    }

    fn invoke_one(&self, plugin: &LoadedPlugin, name: &str, params: &[Value]) {
        if let Err(e) = plugin.invoke(name, params) {
            self.context.span.in_scope(|| error!("{}", e));
        }
    }

    /// Load artifacts, reusing what `previous` already holds where possible.
    pub(crate) fn load_artifacts(
        &mut self,
        artifacts: Vec<Artifact>,
        previous: Option<&PluginManager>,
        data: &InitData,
    ) -> HotswapResult<()> {
        let candidates = artifacts.into_iter().map(Candidate::Artifact).collect();
        self.load(candidates, previous, data)
    }

    /// Load compiled-in plugins. Nothing is ever carried over.
    pub(crate) fn load_static(
        &mut self,
        plugins: Vec<StaticPlugin>,
        data: &InitData,
    ) -> HotswapResult<()> {
        self.is_static = true;
        let candidates = plugins.into_iter().map(Candidate::Static).collect();
        self.load(candidates, None, data)?;
        self.context
            .span
            .in_scope(|| warn!("<hotswap> running under static linking mode"));
        Ok(())
    }

    pub(crate) fn load(
        &mut self,
        candidates: Vec<Candidate>,
        previous: Option<&PluginManager>,
        data: &InitData,
    ) -> HotswapResult<()> {
        if self.state != ManagerState::Fresh {
            return Err(HotswapError::AlreadyLoaded);
        }
        let span = self.context.span.clone();
        let _entered = span.enter();

        match self.run_load(candidates, previous, data) {
            Ok(()) => {
                self.state = ManagerState::Loaded;
                Ok(())
            }
            Err(e) => {
                self.state = ManagerState::Failed;
                self.release();
                Err(e)
            }
        }
    }

    fn run_load(
        &mut self,
        candidates: Vec<Candidate>,
        previous: Option<&PluginManager>,
        data: &InitData,
    ) -> HotswapResult<()> {
        check_duplicates(&candidates)?;

        let fresh = self.carry_over(candidates, previous);
        self.loaded_at = Local::now();
        for candidate in fresh {
            let name = candidate.name().to_string();
            let plugin = self
                .instantiate(candidate, data)
                .map_err(|e| HotswapError::LoadPlugin {
                    plugin: name.clone(),
                    source: Box::new(e),
                })?;
            self.by_key
                .insert(name_key(&name), LoadedPlugin::new(Arc::new(plugin), Note::Ok));
        }
        self.checkpoint(Checkpoint::Instantiated, data)?;

        self.ordered = deps::resolve(&self.by_key)?;
        self.invoke_load_hooks(data)?;
        self.assemble_vault()?;
        self.invoke_init_hooks()?;

        self.checkpoint(Checkpoint::Initialized, data)
    }

    /// Move the candidates `previous` can lend into this generation and
    /// return the rest, sorted by name.
    fn carry_over(
        &mut self,
        candidates: Vec<Candidate>,
        previous: Option<&PluginManager>,
    ) -> Vec<Candidate> {
        let mut not_reloadable = Vec::new();
        let mut unchanged = Vec::new();
        let mut fresh = Vec::new();

        for candidate in candidates {
            let key = name_key(candidate.name());
            let predecessor = previous.and_then(|p| p.by_key.get(&key));
            let note = match predecessor {
                Some(old) if !old.is_reloadable() => Some(Note::NotReloadable),
                Some(old)
                    if candidate.fingerprint().is_some()
                        && old.fingerprint().copied() == candidate.fingerprint() =>
                {
                    Some(Note::Unchanged)
                }
                _ => None,
            };
            match (predecessor, note) {
                (Some(old), Some(note)) => {
                    old.retain();
                    match note {
                        Note::NotReloadable => not_reloadable.push(old.name().to_string()),
                        _ => unchanged.push(old.name().to_string()),
                    }
                    self.by_key
                        .insert(key, LoadedPlugin::new(old.plugin().clone(), note));
                }
                _ => fresh.push(candidate),
            }
        }

        fresh.sort_by_key(|c| name_key(c.name()));
        not_reloadable.sort();
        unchanged.sort();
        let to_load: Vec<&str> = fresh.iter().map(Candidate::name).collect();
        info!(
            "<hotswap> not reloadable: [{}], unchanged: [{}], to be loaded: [{}]",
            not_reloadable.join(", "),
            unchanged.join(", "),
            to_load.join(", ")
        );
        fresh
    }

    fn instantiate(&self, candidate: Candidate, data: &InitData) -> HotswapResult<Plugin> {
        let plugin = match candidate {
            Candidate::Artifact(artifact) => {
                let source = self.context.loader.open(&artifact, &self.generation)?;
                Plugin::instantiate(
                    &artifact.name,
                    Some(artifact.path.clone()),
                    Some(artifact.fingerprint),
                    self.loaded_at,
                    source,
                )?
            }
            Candidate::Static(sp) => Plugin::instantiate(
                sp.name(),
                None,
                None,
                self.loaded_at,
                Arc::new(sp.table().clone()),
            )?,
        };
        if let Some(on_open) = &self.context.on_open {
            invoke_hook(Some(plugin.name()), "open observer", || on_open(&plugin, data))?;
        }
        Ok(plugin)
    }

    fn checkpoint(&self, checkpoint: Checkpoint, data: &InitData) -> HotswapResult<()> {
        match &self.context.fault_injector {
            Some(inject) => {
                invoke_hook(None, &format!("{checkpoint:?} checkpoint"), || inject(checkpoint, data))
            }
            None => Ok(()),
        }
    }

    fn invoke_load_hooks(&self, data: &InitData) -> HotswapResult<()> {
        for plugin in self.ordered.iter().filter(|p| !p.is_carried_over()) {
            debug!("<hotswap> invoking {}.{}", plugin.name(), ON_LOAD);
            invoke_fallible_hook(plugin.name(), ON_LOAD, || (plugin.funcs().on_load)(data))?;
        }
        Ok(())
    }

    fn invoke_init_hooks(&mut self) -> HotswapResult<()> {
        for plugin in self.ordered.iter().filter(|p| !p.is_carried_over()) {
            debug!("<hotswap> invoking {}.{}", plugin.name(), ON_INIT);
            let vault = &mut self.vault;
            invoke_fallible_hook(plugin.name(), ON_INIT, || (plugin.funcs().on_init)(vault))?;
        }
        Ok(())
    }

    /// Merge every plugin's live functions and live types into the vault.
    fn assemble_vault(&mut self) -> HotswapResult<()> {
        let mut owners = HashMap::new();
        for plugin in &self.ordered {
            let contributed = match &plugin.funcs().live_funcs {
                Some(f) => invoke_hook(Some(plugin.name()), LIVE_FUNCS, || f())?,
                None => Some(HashMap::new()),
            };
            let contributed = contributed.ok_or_else(|| HotswapError::BrokenEnumerator {
                plugin: plugin.name().to_string(),
                symbol: LIVE_FUNCS.to_string(),
            })?;
            merge(
                &mut self.vault.live_funcs,
                &mut owners,
                plugin.name(),
                contributed,
                |name, first, second| HotswapError::DuplicateLiveFunction {
                    name,
                    first,
                    second,
                },
            )?;
        }

        let mut owners = HashMap::new();
        for plugin in &self.ordered {
            let contributed = match &plugin.funcs().live_types {
                Some(f) => invoke_hook(Some(plugin.name()), LIVE_TYPES, || f())?,
                None => Some(HashMap::new()),
            };
            let contributed = contributed.ok_or_else(|| HotswapError::BrokenEnumerator {
                plugin: plugin.name().to_string(),
                symbol: LIVE_TYPES.to_string(),
            })?;
            merge(
                &mut self.vault.live_types,
                &mut owners,
                plugin.name(),
                contributed,
                |name, first, second| HotswapError::DuplicateLiveType {
                    name,
                    first,
                    second,
                },
            )?;
        }
        Ok(())
    }

    /// Drop this generation's hold on its plugins, dependents first.
    ///
    /// Runs at most once; later calls are no-ops.
    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let _entered = self.context.span.enter();
        debug!("<hotswap> releasing generation {}", self.generation);
        if self.ordered.is_empty() {
            for plugin in self.by_key.values() {
                plugin.release();
            }
        } else {
            for plugin in self.ordered.iter().rev() {
                plugin.release();
            }
        }
    }

    /// Whether this generation has given up its plugins.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.ordered.iter().map(|p| p.name()).collect();
        f.debug_struct("PluginManager")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("is_static", &self.is_static)
            .field("plugins", &names)
            .field("vault", &self.vault)
            .finish()
    }
}

fn check_duplicates(candidates: &[Candidate]) -> HotswapResult<()> {
    let mut counters: HashMap<String, usize> = HashMap::new();
    for candidate in candidates {
        *counters.entry(name_key(candidate.name())).or_default() += 1;
    }
    let mut duplicates: Vec<String> = candidates
        .iter()
        .filter(|c| counters.get(&name_key(c.name())).copied().unwrap_or(0) > 1)
        .map(|c| match c.path() {
            Some(path) => path.display().to_string(),
            None => c.name().to_string(),
        })
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    duplicates.sort();
    Err(HotswapError::DuplicateName(duplicates))
}

/// Insert `contributed` into `target`, failing on a name some earlier plugin
/// already contributed.
fn merge<V>(
    target: &mut HashMap<String, V>,
    owners: &mut HashMap<String, String>,
    plugin: &str,
    contributed: HashMap<String, V>,
    duplicate: impl Fn(String, String, String) -> HotswapError,
) -> HotswapResult<()> {
    let mut contributed: Vec<(String, V)> = contributed.into_iter().collect();
    contributed.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in contributed {
        if let Some(first) = owners.get(&name) {
            return Err(duplicate(name, first.clone(), plugin.to_string()));
        }
        owners.insert(name.clone(), plugin.to_string());
        target.insert(name, value);
    }
    Ok(())
}
