//! Static-linking mode: plugins compiled into the host binary

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use hotswap_kernel::{
    HookError, HookResult, Imports, InitData, LiveTypeFactory, Symbol, Value, Vault,
};

use crate::error::{HotswapError, HotswapResult};
use crate::loader::SymbolTable;
use crate::plugin::name_key;

/// A plugin registered in-process instead of being loaded from a file.
#[derive(Clone)]
pub struct StaticPlugin {
    name: String,
    table: SymbolTable,
}

impl StaticPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: SymbolTable::new(),
        }
    }

    pub fn from_table(name: impl Into<String>, table: SymbolTable) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    pub fn with_symbol(mut self, name: impl Into<String>, symbol: Symbol) -> Self {
        self.table.insert(name, symbol);
        self
    }

    pub fn on_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&InitData) -> HookResult + Send + Sync + 'static,
    {
        self.table = self.table.with_on_load(f);
        self
    }

    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Vault) -> HookResult + Send + Sync + 'static,
    {
        self.table = self.table.with_on_init(f);
        self
    }

    pub fn on_free<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.table = self.table.with_on_free(f);
        self
    }

    pub fn export<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<Value> + Send + Sync + 'static,
    {
        self.table = self.table.with_export(f);
        self
    }

    pub fn import<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<Imports> + Send + Sync + 'static,
    {
        self.table = self.table.with_import(f);
        self
    }

    pub fn invoke<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Result<Option<Value>, HookError> + Send + Sync + 'static,
    {
        self.table = self.table.with_invoke(f);
        self
    }

    pub fn reloadable<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.table = self.table.with_reloadable(f);
        self
    }

    pub fn live_funcs<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<HashMap<String, Value>> + Send + Sync + 'static,
    {
        self.table = self.table.with_live_funcs(f);
        self
    }

    pub fn live_types<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<HashMap<String, LiveTypeFactory>> + Send + Sync + 'static,
    {
        self.table = self.table.with_live_types(f);
        self
    }
}

impl fmt::Debug for StaticPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPlugin")
            .field("name", &self.name)
            .field("table", &self.table)
            .finish()
    }
}

/// The set of plugins linked into the host, in registration order.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    plugins: Vec<StaticPlugin>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Name clashes are reported when the registry is
    /// loaded, not here.
    pub fn register(&mut self, plugin: StaticPlugin) {
        self.plugins.push(plugin);
    }

    pub fn with(mut self, plugin: StaticPlugin) -> Self {
        self.register(plugin);
        self
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StaticPlugin> {
        self.plugins.iter()
    }

    /// Plugins admitted by `whitelist`, or all of them when it is empty.
    ///
    /// Every whitelist entry must match a registered plugin; the error names
    /// all entries that do not.
    pub fn select(&self, whitelist: &[String]) -> HotswapResult<Vec<StaticPlugin>> {
        if whitelist.is_empty() {
            return Ok(self.plugins.clone());
        }
        let wanted: BTreeSet<String> = whitelist.iter().map(|w| name_key(w)).collect();
        let selected: Vec<StaticPlugin> = self
            .plugins
            .iter()
            .filter(|p| wanted.contains(&name_key(&p.name)))
            .cloned()
            .collect();
        check_whitelist(whitelist, selected.iter().map(|p| p.name.as_str()))?;
        Ok(selected)
    }
}

impl FromIterator<StaticPlugin> for StaticRegistry {
    fn from_iter<I: IntoIterator<Item = StaticPlugin>>(iter: I) -> Self {
        Self {
            plugins: iter.into_iter().collect(),
        }
    }
}

/// Fail with every whitelist entry that names none of `found`.
pub(crate) fn check_whitelist<'a>(
    whitelist: &[String],
    found: impl IntoIterator<Item = &'a str>,
) -> HotswapResult<()> {
    let found: BTreeSet<String> = found.into_iter().map(name_key).collect();
    let missing: Vec<String> = whitelist
        .iter()
        .filter(|w| !found.contains(&name_key(w)))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(HotswapError::Whitelist(missing))
    }
}
