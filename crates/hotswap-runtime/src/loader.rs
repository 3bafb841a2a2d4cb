//! Artifact loading
//!
//! Binding a symbol name to an in-process value is abstracted behind
//! [`SymbolSource`]. [`NativeLoader`] backs it with real dynamic libraries;
//! [`TableLoader`] and static plugins back it with in-memory
//! [`SymbolTable`]s. The manager's lifecycle logic is the same for all of them.

use std::collections::HashMap;
use std::env::consts::DLL_EXTENSION;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hotswap_kernel::{
    HookError, HookResult, Imports, InitData, LiveTypeFactory, Symbol, SymbolConstructor, Value,
    Vault,
};
use libloading::Library;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{HotswapError, HotswapResult};
use crate::hook::invoke_hook;

/// Resolves symbol names to values.
pub trait SymbolSource: Send + Sync {
    /// `Ok(None)` when the symbol does not exist.
    fn lookup(&self, symbol: &str) -> HotswapResult<Option<Symbol>>;
}

/// In-memory symbol source.
#[derive(Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, symbol: Symbol) -> Option<Symbol> {
        self.symbols.insert(name.into(), symbol)
    }

    pub fn with(mut self, name: impl Into<String>, symbol: Symbol) -> Self {
        self.insert(name, symbol);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.symbols.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn with_on_load<F>(self, f: F) -> Self
    where
        F: Fn(&InitData) -> HookResult + Send + Sync + 'static,
    {
        self.with(hotswap_kernel::symbol::ON_LOAD, Symbol::on_load(f))
    }

    pub fn with_on_init<F>(self, f: F) -> Self
    where
        F: Fn(&mut Vault) -> HookResult + Send + Sync + 'static,
    {
        self.with(hotswap_kernel::symbol::ON_INIT, Symbol::on_init(f))
    }

    pub fn with_on_free<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.with(hotswap_kernel::symbol::ON_FREE, Symbol::on_free(f))
    }

    pub fn with_export<F>(self, f: F) -> Self
    where
        F: Fn() -> Option<Value> + Send + Sync + 'static,
    {
        self.with(hotswap_kernel::symbol::EXPORT, Symbol::export(f))
    }

    pub fn with_import<F>(self, f: F) -> Self
    where
        F: Fn() -> Option<Imports> + Send + Sync + 'static,
    {
        self.with(hotswap_kernel::symbol::IMPORT, Symbol::import(f))
    }

    pub fn with_invoke<F>(self, f: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Result<Option<Value>, HookError> + Send + Sync + 'static,
    {
        self.with(hotswap_kernel::symbol::INVOKE, Symbol::invoke(f))
    }

    pub fn with_reloadable<F>(self, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.with(hotswap_kernel::symbol::RELOADABLE, Symbol::reloadable(f))
    }

    pub fn with_live_funcs<F>(self, f: F) -> Self
    where
        F: Fn() -> Option<HashMap<String, Value>> + Send + Sync + 'static,
    {
        self.with(hotswap_kernel::symbol::LIVE_FUNCS, Symbol::live_funcs(f))
    }

    pub fn with_live_types<F>(self, f: F) -> Self
    where
        F: Fn() -> Option<HashMap<String, LiveTypeFactory>> + Send + Sync + 'static,
    {
        self.with(hotswap_kernel::symbol::LIVE_TYPES, Symbol::live_types(f))
    }
}

impl SymbolSource for SymbolTable {
    fn lookup(&self, symbol: &str) -> HotswapResult<Option<Symbol>> {
        Ok(self.symbols.get(symbol).cloned())
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("symbols", &self.names())
            .finish()
    }
}

/// SHA-256 of an artifact's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex digits.
    pub fn short(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// A plugin artifact read from disk.
#[derive(Clone)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub data: Arc<[u8]>,
    pub fingerprint: Fingerprint,
}

impl Artifact {
    pub fn read(path: impl AsRef<Path>) -> HotswapResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| HotswapError::io(path, e))?;
        Ok(Self::from_bytes(path, data))
    }

    pub fn from_bytes(path: impl Into<PathBuf>, data: Vec<u8>) -> Self {
        let path = path.into();
        Self {
            name: plugin_name(&path),
            fingerprint: Fingerprint::of(&data),
            data: data.into(),
            path,
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("len", &self.data.len())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Opens artifacts as symbol sources.
pub trait ArtifactLoader: Send + Sync {
    /// `generation` identifies the manager generation doing the load.
    fn open(&self, artifact: &Artifact, generation: &str) -> HotswapResult<Arc<dyn SymbolSource>>;
}

/// A dynamic library mapped into the process.
///
/// The handle is never closed: code pages of a superseded plugin stay mapped
/// for the life of the process.
pub struct NativeLibrary {
    name: String,
    path: PathBuf,
    library: &'static Library,
}

impl NativeLibrary {
    pub fn open(name: impl Into<String>, path: impl Into<PathBuf>) -> HotswapResult<Self> {
        let path = path.into();
        // SAFETY: loading a library runs its initializers. Artifacts are
        // trusted build outputs of the embedding application.
        let library = unsafe { Library::new(&path) }.map_err(|e| HotswapError::Open {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        info!("Loaded plugin library: {:?}", path);
        Ok(Self {
            name: name.into(),
            path,
            library: Box::leak(Box::new(library)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SymbolSource for NativeLibrary {
    fn lookup(&self, symbol: &str) -> HotswapResult<Option<Symbol>> {
        // SAFETY: plugins export every symbol through `declare_symbols!`,
        // which gives each one the `SymbolConstructor` signature.
        let ctor: SymbolConstructor = match unsafe { self.library.get::<SymbolConstructor>(symbol.as_bytes()) } {
            Ok(sym) => *sym,
            Err(_) => return Ok(None),
        };
        invoke_hook(Some(&self.name), symbol, ctor).map(Some)
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

/// Loads artifacts as native dynamic libraries.
///
/// Each artifact is first copied to
/// `<dir>/tmp/<generation>/<name>-<fingerprint prefix>.<ext>`, so a rebuilt
/// file always gets a fresh mapping instead of the one the OS already has.
#[derive(Debug, Clone, Default)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }

    fn stage(&self, artifact: &Artifact, generation: &str) -> HotswapResult<PathBuf> {
        let dir = artifact
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("tmp")
            .join(generation);
        std::fs::create_dir_all(&dir).map_err(|e| HotswapError::io(&dir, e))?;

        let dst = dir.join(format!(
            "{}-{}.{}",
            artifact.name,
            artifact.fingerprint.short(),
            DLL_EXTENSION
        ));
        std::fs::write(&dst, &artifact.data).map_err(|e| HotswapError::io(&dst, e))?;
        debug!("Staged {:?} as {:?}", artifact.path, dst);
        Ok(dst)
    }
}

impl ArtifactLoader for NativeLoader {
    fn open(&self, artifact: &Artifact, generation: &str) -> HotswapResult<Arc<dyn SymbolSource>> {
        let staged = self.stage(artifact, generation)?;
        let library = NativeLibrary::open(artifact.name.clone(), staged)?;
        Ok(Arc::new(library))
    }
}

/// Builds the symbol table for an artifact.
pub type TableFactory = Arc<dyn Fn(&Artifact) -> SymbolTable + Send + Sync>;

/// Resolves artifacts against in-memory symbol tables registered by plugin
/// name. The artifact bytes still drive change detection.
#[derive(Clone, Default)]
pub struct TableLoader {
    tables: HashMap<String, TableFactory>,
}

impl TableLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&Artifact) -> SymbolTable + Send + Sync + 'static,
    {
        self.insert(name, factory);
        self
    }

    pub fn insert<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Artifact) -> SymbolTable + Send + Sync + 'static,
    {
        self.tables.insert(name.to_lowercase(), Arc::new(factory));
    }
}

impl ArtifactLoader for TableLoader {
    fn open(&self, artifact: &Artifact, _generation: &str) -> HotswapResult<Arc<dyn SymbolSource>> {
        let factory = self
            .tables
            .get(&artifact.name.to_lowercase())
            .ok_or_else(|| HotswapError::Open {
                path: artifact.path.clone(),
                reason: format!("no symbol table registered for {}", artifact.name),
            })?;
        let table = invoke_hook(Some(&artifact.name), "symbol table", || factory(artifact))?;
        Ok(Arc::new(table))
    }
}

impl fmt::Debug for TableLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.tables.keys().collect();
        names.sort();
        f.debug_struct("TableLoader").field("tables", &names).finish()
    }
}

/// Plugin name of an artifact: its file name without the platform extension.
pub fn plugin_name(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!(".{DLL_EXTENSION}");
    match file.strip_suffix(&suffix) {
        Some(stem) => stem.to_string(),
        None => file,
    }
}

/// List the plugin artifacts in `dir`, sorted.
pub fn scan_plugin_dir(dir: &Path) -> HotswapResult<Vec<PathBuf>> {
    if dir.as_os_str().to_string_lossy().trim().is_empty() {
        return Err(HotswapError::EmptyPluginDir);
    }
    let meta = std::fs::metadata(dir).map_err(|e| HotswapError::io(dir, e))?;
    if !meta.is_dir() {
        return Err(HotswapError::NotADirectory(dir.to_path_buf()));
    }
    let abs_dir = std::path::absolute(dir).map_err(|e| HotswapError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&abs_dir).map_err(|e| HotswapError::io(&abs_dir, e))? {
        let entry = entry.map_err(|e| HotswapError::io(&abs_dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) == Some(DLL_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
