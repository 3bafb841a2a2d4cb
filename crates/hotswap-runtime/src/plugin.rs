//! A loaded plugin unit and its function table

use std::any::type_name;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Once, OnceLock};

use chrono::{DateTime, Local};
use hotswap_kernel::symbol::{
    EXPORT, IMPORT, INVOKE, LIVE_FUNCS, LIVE_TYPES, ON_FREE, ON_INIT, ON_LOAD, RELOADABLE,
};
use hotswap_kernel::{
    ExportFn, ImportFn, InvokeFn, LiveFuncsFn, LiveTypesFn, OnFreeFn, OnInitFn, OnLoadFn,
    ReloadableFn, Symbol, SymbolKind, Value,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{HotswapError, HotswapResult};
use crate::hook::invoke_hook;
use crate::loader::{Fingerprint, SymbolSource};

/// Lookup key of a plugin name. Names compare case-insensitively.
pub(crate) fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Outcome of diffing a plugin against the generation it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Note {
    /// Freshly loaded in this generation
    Ok,
    /// Carried over because its artifact did not change
    Unchanged,
    /// Carried over because its predecessor is not reloadable
    NotReloadable,
}

impl Note {
    pub fn as_str(&self) -> &'static str {
        match self {
            Note::Ok => "ok",
            Note::Unchanged => "unchanged",
            Note::NotReloadable => "not-reloadable",
        }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved entry points of a plugin.
#[derive(Clone)]
pub struct PluginFuncs {
    pub(crate) on_load: OnLoadFn,
    pub(crate) on_init: OnInitFn,
    pub(crate) on_free: OnFreeFn,
    pub(crate) export: ExportFn,
    pub(crate) import: ImportFn,
    pub(crate) invoke: InvokeFn,
    pub(crate) reloadable: ReloadableFn,
    pub(crate) live_funcs: Option<LiveFuncsFn>,
    pub(crate) live_types: Option<LiveTypesFn>,
}

const ENTRY_POINTS: [(&str, SymbolKind, bool); 9] = [
    (ON_LOAD, SymbolKind::OnLoad, true),
    (ON_INIT, SymbolKind::OnInit, true),
    (ON_FREE, SymbolKind::OnFree, true),
    (EXPORT, SymbolKind::Export, true),
    (IMPORT, SymbolKind::Import, true),
    (INVOKE, SymbolKind::Invoke, true),
    (RELOADABLE, SymbolKind::Reloadable, true),
    (LIVE_FUNCS, SymbolKind::LiveFuncs, false),
    (LIVE_TYPES, SymbolKind::LiveTypes, false),
];

impl PluginFuncs {
    /// Resolve every entry point of `plugin` against `source`.
    ///
    /// Absent and nil required entries are collected and reported together;
    /// an entry of the wrong kind fails immediately.
    pub fn resolve(plugin: &str, source: &dyn SymbolSource) -> HotswapResult<Self> {
        let mut on_load = None;
        let mut on_init = None;
        let mut on_free = None;
        let mut export = None;
        let mut import = None;
        let mut invoke = None;
        let mut reloadable = None;
        let mut live_funcs = None;
        let mut live_types = None;

        let mut missing = Vec::new();
        for (symbol, kind, required) in ENTRY_POINTS {
            match source.lookup(symbol)? {
                None | Some(Symbol::Nil) => {
                    if required {
                        missing.push(symbol.to_string());
                    }
                }
                Some(resolved) => match (symbol, resolved) {
                    (ON_LOAD, Symbol::OnLoad(f)) => on_load = Some(f),
                    (ON_INIT, Symbol::OnInit(f)) => on_init = Some(f),
                    (ON_FREE, Symbol::OnFree(f)) => on_free = Some(f),
                    (EXPORT, Symbol::Export(f)) => export = Some(f),
                    (IMPORT, Symbol::Import(f)) => import = Some(f),
                    (INVOKE, Symbol::Invoke(f)) => invoke = Some(f),
                    (RELOADABLE, Symbol::Reloadable(f)) => reloadable = Some(f),
                    (LIVE_FUNCS, Symbol::LiveFuncs(f)) => live_funcs = Some(f),
                    (LIVE_TYPES, Symbol::LiveTypes(f)) => live_types = Some(f),
                    (_, other) => {
                        return Err(HotswapError::type_mismatch(
                            plugin,
                            symbol,
                            kind,
                            other.kind(),
                        ));
                    }
                },
            }
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(HotswapError::MissingFunctions(missing));
        }

        match (on_load, on_init, on_free, export, import, invoke, reloadable) {
            (
                Some(on_load),
                Some(on_init),
                Some(on_free),
                Some(export),
                Some(import),
                Some(invoke),
                Some(reloadable),
            ) => Ok(Self {
                on_load,
                on_init,
                on_free,
                export,
                import,
                invoke,
                reloadable,
                live_funcs,
                live_types,
            }),
            _ => Err(HotswapError::Internal(format!(
                "entry points of {plugin} vanished during resolution"
            ))),
        }
    }
}

/// One loaded plugin unit.
///
/// A plugin carried over into later generations is shared between them by
/// reference; its reference count tracks how many generations hold it, and
/// its free hook runs once, when the last of them is released.
pub struct Plugin {
    name: String,
    file: Option<PathBuf>,
    fingerprint: Option<Fingerprint>,
    loaded_at: DateTime<Local>,
    funcs: PluginFuncs,
    source: Arc<dyn SymbolSource>,
    dependencies: OnceLock<Vec<String>>,
    exported: Option<Value>,
    reloadable: bool,
    refs: AtomicI64,
    free_once: Once,
}

impl Plugin {
    /// Resolve the function table and record the plugin's reloadability and
    /// export value.
    pub(crate) fn instantiate(
        name: &str,
        file: Option<PathBuf>,
        fingerprint: Option<Fingerprint>,
        loaded_at: DateTime<Local>,
        source: Arc<dyn SymbolSource>,
    ) -> HotswapResult<Self> {
        let funcs = PluginFuncs::resolve(name, source.as_ref())?;
        let reloadable = invoke_hook(Some(name), RELOADABLE, || (funcs.reloadable)())?;
        let exported = invoke_hook(Some(name), EXPORT, || (funcs.export)())?;

        Ok(Self {
            name: name.to_string(),
            file,
            fingerprint,
            loaded_at,
            funcs,
            source,
            dependencies: OnceLock::new(),
            exported,
            reloadable,
            refs: AtomicI64::new(1),
            free_once: Once::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Artifact the plugin was loaded from. `None` for static plugins.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn loaded_at(&self) -> DateTime<Local> {
        self.loaded_at
    }

    /// Names of the plugins this one depends on, in declaration order.
    pub fn dependencies(&self) -> &[String] {
        self.dependencies.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn exported(&self) -> Option<&Value> {
        self.exported.as_ref()
    }

    pub fn is_reloadable(&self) -> bool {
        self.reloadable
    }

    /// Number of generations currently holding this plugin.
    pub fn ref_count(&self) -> i64 {
        self.refs.load(Ordering::Acquire)
    }

    /// Whether the free hook has run.
    pub fn is_freed(&self) -> bool {
        self.free_once.is_completed()
    }

    /// Look up a symbol by name.
    ///
    /// Absent symbols are an error, nil symbols are `Ok(None)`.
    pub fn lookup(&self, symbol: &str) -> HotswapResult<Option<Symbol>> {
        match self.source.lookup(symbol)? {
            None => Err(HotswapError::SymbolNotExist {
                plugin: self.name.clone(),
                symbol: symbol.to_string(),
            }),
            Some(Symbol::Nil) => Ok(None),
            Some(found) => Ok(Some(found)),
        }
    }

    /// Look up a value symbol and downcast it to `T`.
    pub fn lookup_value<T>(&self, symbol: &str) -> HotswapResult<Option<T>>
    where
        T: Clone + 'static,
    {
        let mismatch = |actual: String| HotswapError::SymbolTypeMismatch {
            plugin: self.name.clone(),
            symbol: symbol.to_string(),
            expected: type_name::<T>().to_string(),
            actual,
        };
        match self.lookup(symbol)? {
            None => Ok(None),
            Some(Symbol::Value(v)) => match v.as_ref().downcast_ref::<T>() {
                Some(t) => Ok(Some(t.clone())),
                None => Err(mismatch(SymbolKind::Value.to_string())),
            },
            Some(other) => Err(mismatch(other.kind().to_string())),
        }
    }

    /// Call the plugin's invoke entry point.
    pub fn invoke(&self, name: &str, params: &[Value]) -> HotswapResult<Option<Value>> {
        invoke_hook(Some(&self.name), INVOKE, || (self.funcs.invoke)(name, params))?.map_err(
            |source| HotswapError::Hook {
                plugin: self.name.clone(),
                hook: format!("{INVOKE}({name})"),
                source,
            },
        )
    }

    pub(crate) fn funcs(&self) -> &PluginFuncs {
        &self.funcs
    }

    pub(crate) fn set_dependencies(&self, deps: Vec<String>) {
        if self.dependencies.set(deps).is_err() {
            debug!("<hotswap:{}> dependencies already recorded", self.name);
        }
    }

    pub(crate) fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; runs the free hook when none are left.
    pub(crate) fn release(&self) {
        if self.refs.fetch_sub(1, Ordering::AcqRel) - 1 > 0 {
            return;
        }
        self.free_once.call_once(|| {
            debug!("<hotswap> invoking {}.{}", self.name, ON_FREE);
            if let Err(e) = invoke_hook(Some(&self.name), ON_FREE, || (self.funcs.on_free)()) {
                error!("{}", e);
            }
        });
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("fingerprint", &self.fingerprint)
            .field("loaded_at", &self.loaded_at)
            .field("dependencies", &self.dependencies())
            .field("reloadable", &self.reloadable)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// A plugin as seen by one generation.
#[derive(Clone)]
pub struct LoadedPlugin {
    plugin: Arc<Plugin>,
    note: Note,
}

impl LoadedPlugin {
    pub(crate) fn new(plugin: Arc<Plugin>, note: Note) -> Self {
        Self { plugin, note }
    }

    /// The shared plugin. Carried-over plugins are pointer-identical across
    /// generations.
    pub fn plugin(&self) -> &Arc<Plugin> {
        &self.plugin
    }

    pub fn note(&self) -> Note {
        self.note
    }

    /// Whether this generation reused the plugin instead of loading it.
    pub fn is_carried_over(&self) -> bool {
        self.note != Note::Ok
    }

    pub fn summary(&self) -> PluginSummary {
        PluginSummary {
            name: self.plugin.name.clone(),
            file: self.plugin.file.clone(),
            fingerprint: self.plugin.fingerprint.map(|f| f.to_string()),
            loaded_at: self.plugin.loaded_at,
            note: self.note,
            dependencies: self.plugin.dependencies().to_vec(),
            reloadable: self.plugin.reloadable,
            refs: self.plugin.ref_count(),
        }
    }
}

impl Deref for LoadedPlugin {
    type Target = Plugin;

    fn deref(&self) -> &Plugin {
        &self.plugin
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("plugin", &self.plugin)
            .field("note", &self.note)
            .finish()
    }
}

/// Serializable snapshot of a plugin, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub file: Option<PathBuf>,
    pub fingerprint: Option<String>,
    pub loaded_at: DateTime<Local>,
    pub note: Note,
    pub dependencies: Vec<String>,
    pub reloadable: bool,
    pub refs: i64,
}
