//! Plugin entry points
//!
//! A plugin exposes its function table as named symbols. Each symbol resolves
//! to a [`Symbol`] whose variant tells the runtime what kind of value it is,
//! so "absent", "present but nil" and "present with the wrong type" stay
//! distinguishable.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::imports::Imports;
use crate::value::{HookError, HookResult, InitData, LiveTypeFactory, Value};
use crate::vault::Vault;

pub const ON_LOAD: &str = "hotswap_on_load";
pub const ON_INIT: &str = "hotswap_on_init";
pub const ON_FREE: &str = "hotswap_on_free";
pub const EXPORT: &str = "hotswap_export";
pub const IMPORT: &str = "hotswap_import";
pub const INVOKE: &str = "hotswap_invoke";
pub const RELOADABLE: &str = "hotswap_reloadable";
pub const LIVE_FUNCS: &str = "hotswap_live_funcs";
pub const LIVE_TYPES: &str = "hotswap_live_types";

pub type OnLoadFn = Arc<dyn Fn(&InitData) -> HookResult + Send + Sync>;
pub type OnInitFn = Arc<dyn Fn(&mut Vault) -> HookResult + Send + Sync>;
pub type OnFreeFn = Arc<dyn Fn() + Send + Sync>;
pub type ExportFn = Arc<dyn Fn() -> Option<Value> + Send + Sync>;
pub type ImportFn = Arc<dyn Fn() -> Option<Imports> + Send + Sync>;
pub type InvokeFn = Arc<dyn Fn(&str, &[Value]) -> Result<Option<Value>, HookError> + Send + Sync>;
pub type ReloadableFn = Arc<dyn Fn() -> bool + Send + Sync>;
pub type LiveFuncsFn = Arc<dyn Fn() -> Option<HashMap<String, Value>> + Send + Sync>;
pub type LiveTypesFn = Arc<dyn Fn() -> Option<HashMap<String, LiveTypeFactory>> + Send + Sync>;

/// Signature of the constructor a native plugin exports under each symbol name.
pub type SymbolConstructor = fn() -> Symbol;

/// The kind of value a symbol resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Nil,
    OnLoad,
    OnInit,
    OnFree,
    Export,
    Import,
    Invoke,
    Reloadable,
    LiveFuncs,
    LiveTypes,
    Value,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SymbolKind::Nil => "nil",
            SymbolKind::OnLoad => "fn(&InitData) -> HookResult",
            SymbolKind::OnInit => "fn(&mut Vault) -> HookResult",
            SymbolKind::OnFree => "fn()",
            SymbolKind::Export => "fn() -> Option<Value>",
            SymbolKind::Import => "fn() -> Option<Imports>",
            SymbolKind::Invoke => "fn(&str, &[Value]) -> Result<Option<Value>, HookError>",
            SymbolKind::Reloadable => "fn() -> bool",
            SymbolKind::LiveFuncs => "fn() -> Option<HashMap<String, Value>>",
            SymbolKind::LiveTypes => "fn() -> Option<HashMap<String, LiveTypeFactory>>",
            SymbolKind::Value => "Value",
        };
        f.write_str(s)
    }
}

/// A resolved symbol.
#[derive(Clone)]
pub enum Symbol {
    /// Present, but deliberately not provided
    Nil,
    OnLoad(OnLoadFn),
    OnInit(OnInitFn),
    OnFree(OnFreeFn),
    Export(ExportFn),
    Import(ImportFn),
    Invoke(InvokeFn),
    Reloadable(ReloadableFn),
    LiveFuncs(LiveFuncsFn),
    LiveTypes(LiveTypesFn),
    /// Any other exported value
    Value(Value),
}

impl Symbol {
    pub fn kind(&self) -> SymbolKind {
        match self {
            Symbol::Nil => SymbolKind::Nil,
            Symbol::OnLoad(_) => SymbolKind::OnLoad,
            Symbol::OnInit(_) => SymbolKind::OnInit,
            Symbol::OnFree(_) => SymbolKind::OnFree,
            Symbol::Export(_) => SymbolKind::Export,
            Symbol::Import(_) => SymbolKind::Import,
            Symbol::Invoke(_) => SymbolKind::Invoke,
            Symbol::Reloadable(_) => SymbolKind::Reloadable,
            Symbol::LiveFuncs(_) => SymbolKind::LiveFuncs,
            Symbol::LiveTypes(_) => SymbolKind::LiveTypes,
            Symbol::Value(_) => SymbolKind::Value,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Symbol::Nil)
    }

    pub fn on_load<F>(f: F) -> Self
    where
        F: Fn(&InitData) -> HookResult + Send + Sync + 'static,
    {
        Symbol::OnLoad(Arc::new(f))
    }

    pub fn on_init<F>(f: F) -> Self
    where
        F: Fn(&mut Vault) -> HookResult + Send + Sync + 'static,
    {
        Symbol::OnInit(Arc::new(f))
    }

    pub fn on_free<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Symbol::OnFree(Arc::new(f))
    }

    pub fn export<F>(f: F) -> Self
    where
        F: Fn() -> Option<Value> + Send + Sync + 'static,
    {
        Symbol::Export(Arc::new(f))
    }

    pub fn import<F>(f: F) -> Self
    where
        F: Fn() -> Option<Imports> + Send + Sync + 'static,
    {
        Symbol::Import(Arc::new(f))
    }

    pub fn invoke<F>(f: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Result<Option<Value>, HookError> + Send + Sync + 'static,
    {
        Symbol::Invoke(Arc::new(f))
    }

    pub fn reloadable<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Symbol::Reloadable(Arc::new(f))
    }

    pub fn live_funcs<F>(f: F) -> Self
    where
        F: Fn() -> Option<HashMap<String, Value>> + Send + Sync + 'static,
    {
        Symbol::LiveFuncs(Arc::new(f))
    }

    pub fn live_types<F>(f: F) -> Self
    where
        F: Fn() -> Option<HashMap<String, LiveTypeFactory>> + Send + Sync + 'static,
    {
        Symbol::LiveTypes(Arc::new(f))
    }

    pub fn value(value: Value) -> Self {
        Symbol::Value(value)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.kind())
    }
}

/// Export a plugin's symbols from a `cdylib`.
///
/// Each entry becomes an unmangled constructor returning the [`Symbol`], which
/// is what the native loader resolves by name.
///
/// ```rust,ignore
/// use hotswap_kernel::{declare_symbols, Symbol};
///
/// declare_symbols! {
///     hotswap_on_load => Symbol::on_load(|_| Ok(())),
///     hotswap_reloadable => Symbol::reloadable(|| true),
///     build_tag => Symbol::value(hotswap_kernel::export("stark")),
/// }
/// ```
#[macro_export]
macro_rules! declare_symbols {
    ($($name:ident => $symbol:expr),* $(,)?) => {
        $(
            #[allow(non_snake_case)]
            #[unsafe(no_mangle)]
            pub fn $name() -> $crate::Symbol {
                $symbol
            }
        )*
    };
}
