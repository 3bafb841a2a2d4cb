//! Typed errors for the hotswap runtime.

use std::path::PathBuf;

use hotswap_kernel::{HookError, SymbolKind};
use thiserror::Error;

/// Errors that can occur while loading, reloading or releasing plugins.
///
/// Everything that goes wrong inside one load attempt, including panics
/// raised by plugin code, ends up as one of these values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HotswapError {
    /// The configured plugin directory is an empty string.
    #[error("pluginDir cannot be empty")]
    EmptyPluginDir,

    /// The configured plugin directory is not a directory.
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// An I/O error surfaced while reading the plugin source.
    #[error("{source}. path: {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The plugin source holds no plugin.
    #[error("no plugin found in {0}")]
    NoPlugins(String),

    /// A manager generation was asked to load a second time.
    #[error("never call load_plugins twice")]
    AlreadyLoaded,

    /// Reload was requested on a swapper backed by static plugins.
    #[error("running under static linking mode")]
    StaticMode,

    /// Whitelist entries that match no plugin.
    #[error("cannot find the plugin(s): {}", .0.join(", "))]
    Whitelist(Vec<String>),

    /// Two or more candidates share a name, case-insensitively.
    #[error("duplicate name detected: {}", .0.join(", "))]
    DuplicateName(Vec<String>),

    /// Required entry points that are absent or nil.
    #[error("missing functions: {}", .0.join(", "))]
    MissingFunctions(Vec<String>),

    /// A symbol is present but has the wrong type.
    #[error("failed to assign {symbol}. plugin: {plugin}, expected: {expected}, actual: {actual}")]
    SymbolTypeMismatch {
        plugin: String,
        symbol: String,
        expected: String,
        actual: String,
    },

    /// A symbol looked up by name does not exist.
    #[error("symbol does not exist: {symbol}. plugin: {plugin}")]
    SymbolNotExist { plugin: String, symbol: String },

    /// The artifact could not be opened.
    #[error("failed to open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    /// Instantiating one plugin failed.
    #[error("failed to load the plugin {plugin}. err: {source}")]
    LoadPlugin {
        plugin: String,
        #[source]
        source: Box<HotswapError>,
    },

    /// A dependency was declared without a name.
    #[error("dependency of the import list cannot be anonymous. type: {ty}, plugin: {plugin}")]
    AnonymousDependency { plugin: String, ty: String },

    /// A dependency names no plugin of the generation.
    #[error("unknown dependency: {dependency}. plugin: {plugin}")]
    UnknownDependency { plugin: String, dependency: String },

    /// A plugin that is not reloadable depends on one that is.
    #[error("{plugin} is NOT reloadable while its dependency, {dependency}, is reloadable")]
    ReloadabilityMismatch { plugin: String, dependency: String },

    /// The dependency's export does not fit the declared slot.
    #[error(
        "the return value {dependency}.export() is not assignable to {plugin}.import().{field}. expected: {expected}"
    )]
    NotAssignable {
        plugin: String,
        dependency: String,
        field: String,
        expected: String,
    },

    /// A cycle in the dependency graph, entry point first and last.
    #[error("cyclic dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// A carried-over plugin depends on a freshly built one.
    #[error("{rebuilt} was rebuilt while {stale} was not")]
    StaleDependency { rebuilt: String, stale: String },

    /// Two plugins contribute the same live function name.
    #[error("duplicate live function name detected: {name}. plugins: {first}, {second}")]
    DuplicateLiveFunction {
        name: String,
        first: String,
        second: String,
    },

    /// Two plugins contribute the same live type name.
    #[error("duplicate live type name detected: {name}. plugins: {first}, {second}")]
    DuplicateLiveType {
        name: String,
        first: String,
        second: String,
    },

    /// An enumerator returned nil instead of a mapping.
    #[error("something is wrong with {symbol}(). plugin: {plugin}")]
    BrokenEnumerator { plugin: String, symbol: String },

    /// A hook returned an error.
    #[error("<hotswap:{plugin}> {hook} failed: {source}")]
    Hook {
        plugin: String,
        hook: String,
        #[source]
        source: HookError,
    },

    /// Plugin code (or a reload callback) panicked.
    #[error("<hotswap{}> panic in {hook}: {payload}\n{backtrace}", plugin_tag(.plugin))]
    Panic {
        plugin: Option<String>,
        hook: String,
        payload: String,
        backtrace: String,
    },

    /// A reload callback rejected the new generation.
    #[error("reload callback failed: {0}")]
    Callback(#[source] HookError),

    /// An internal invariant does not hold.
    #[error("internal error: {0}")]
    Internal(String),
}

fn plugin_tag(plugin: &Option<String>) -> String {
    match plugin {
        Some(name) => format!(":{name}"),
        None => String::new(),
    }
}

impl HotswapError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HotswapError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn type_mismatch(
        plugin: &str,
        symbol: &str,
        expected: SymbolKind,
        actual: SymbolKind,
    ) -> Self {
        HotswapError::SymbolTypeMismatch {
            plugin: plugin.to_string(),
            symbol: symbol.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Whether this error came from a panic inside plugin code.
    pub fn is_panic(&self) -> bool {
        match self {
            HotswapError::Panic { .. } => true,
            HotswapError::LoadPlugin { source, .. } => source.is_panic(),
            _ => false,
        }
    }
}

/// Result type for hotswap operations.
pub type HotswapResult<T> = Result<T, HotswapError>;
