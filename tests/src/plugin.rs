use std::collections::HashMap;
use std::sync::Arc;

use hotswap_kernel::symbol::{
    EXPORT, IMPORT, INVOKE, LIVE_FUNCS, LIVE_TYPES, ON_FREE, ON_INIT, ON_LOAD, RELOADABLE,
};
use hotswap_kernel::{HookError, Imports, LiveTypeFactory, Slot, Value, export};
use hotswap_runtime::{StaticPlugin, SymbolTable};
use parking_lot::{Mutex, RwLock};

/// How a hook misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Return an error
    Fail,
    /// Panic
    Panic,
}

/// Records hook calls as `<plugin>.<symbol>`, shared by every plugin of a
/// test.
#[derive(Debug, Clone, Default)]
pub struct HookJournal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl HookJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, plugin: &str, symbol: &str) {
        self.entries.lock().push(format!("{plugin}.{symbol}"));
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Entries recorded for `symbol`, in call order.
    pub fn calls_of(&self, symbol: &str) -> Vec<String> {
        let suffix = format!(".{symbol}");
        self.entries
            .lock()
            .iter()
            .filter(|e| e.ends_with(&suffix))
            .cloned()
            .collect()
    }

    /// Number of times `plugin` ran `symbol`.
    pub fn count(&self, plugin: &str, symbol: &str) -> usize {
        let entry = format!("{plugin}.{symbol}");
        self.entries.lock().iter().filter(|e| **e == entry).count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// A plugin built from in-memory closures
///
/// Each plugin exports its own name as a `String` and declares its
/// dependencies with `String` slots, so tests can check what was injected.
/// Faults can be switched on and off between loads.
#[derive(Clone)]
pub struct MockPlugin {
    name: String,
    reloadable: bool,
    exports: bool,
    dependencies: Vec<String>,
    live_funcs: Vec<String>,
    live_types: Vec<String>,
    faults: Arc<RwLock<HashMap<&'static str, Fault>>>,
    injected: Arc<Mutex<HashMap<String, Slot<String>>>>,
    journal: HookJournal,
}

impl MockPlugin {
    pub fn new(name: &str, journal: &HookJournal) -> Self {
        Self {
            name: name.to_string(),
            reloadable: true,
            exports: true,
            dependencies: Vec::new(),
            live_funcs: Vec::new(),
            live_types: Vec::new(),
            faults: Arc::default(),
            injected: Arc::default(),
            journal: journal.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a dependency on `plugin`.
    pub fn depends_on(mut self, plugin: &str) -> Self {
        self.dependencies.push(plugin.to_string());
        self
    }

    pub fn not_reloadable(mut self) -> Self {
        self.reloadable = false;
        self
    }

    /// Export nothing.
    pub fn without_export(mut self) -> Self {
        self.exports = false;
        self
    }

    pub fn with_live_func(mut self, name: &str) -> Self {
        self.live_funcs.push(name.to_string());
        self
    }

    pub fn with_live_type(mut self, name: &str) -> Self {
        self.live_types.push(name.to_string());
        self
    }

    /// Make `symbol` misbehave from now on.
    pub fn set_fault(&self, symbol: &'static str, fault: Fault) {
        self.faults.write().insert(symbol, fault);
    }

    pub fn clear_faults(&self) {
        self.faults.write().clear();
    }

    /// Value injected for the dependency declared as `dependency`.
    pub fn injected(&self, dependency: &str) -> Option<String> {
        self.injected.lock().get(dependency).and_then(Slot::get)
    }

    /// Build the plugin's symbol table.
    pub fn table(&self) -> SymbolTable {
        let on_load = self.hook(ON_LOAD);
        let on_init = self.hook(ON_INIT);
        let on_free = self.hook(ON_FREE);
        let on_invoke = self.hook(INVOKE);
        let on_export = self.hook(EXPORT);
        let on_import = self.hook(IMPORT);
        let on_reloadable = self.hook(RELOADABLE);
        let on_live_funcs = self.hook(LIVE_FUNCS);
        let on_live_types = self.hook(LIVE_TYPES);

        let name = self.name.clone();
        let reloadable = self.reloadable;
        let exports = self.exports;
        let dependencies = self.dependencies.clone();
        let injected = self.injected.clone();
        let live_funcs = self.live_funcs.clone();
        let live_types = self.live_types.clone();
        let exported = name.clone();
        let owner = name.clone();

        SymbolTable::new()
            .with_on_load(move |_| on_load.call())
            .with_on_init(move |_| on_init.call())
            .with_on_free(move || {
                let _ = on_free.call();
            })
            .with_export(move || {
                let _ = on_export.call();
                exports.then(|| export(exported.clone()))
            })
            .with_import(move || {
                let _ = on_import.call();
                if dependencies.is_empty() {
                    return None;
                }
                let mut slots = injected.lock();
                let imports = dependencies.iter().fold(Imports::new(), |imports, dep| {
                    let slot = slots.entry(dep.clone()).or_default();
                    imports.with(dep.clone(), slot)
                });
                Some(imports)
            })
            .with_invoke(move |call, _| {
                on_invoke.call()?;
                Ok(Some(export(format!("{call}:{name}"))))
            })
            .with_reloadable(move || {
                let _ = on_reloadable.call();
                reloadable
            })
            .with_live_funcs(move || {
                let _ = on_live_funcs.call();
                Some(
                    live_funcs
                        .iter()
                        .map(|f| (f.clone(), export(owner.clone())))
                        .collect(),
                )
            })
            .with_live_types(move || {
                let _ = on_live_types.call();
                Some(
                    live_types
                        .iter()
                        .map(|t| {
                            let value = t.clone();
                            let factory: LiveTypeFactory = Arc::new(move || export(value.clone()));
                            (t.clone(), factory)
                        })
                        .collect(),
                )
            })
    }

    /// The plugin as a compiled-in plugin.
    pub fn to_static(&self) -> StaticPlugin {
        StaticPlugin::from_table(self.name.clone(), self.table())
    }

    fn hook(&self, symbol: &'static str) -> HookProbe {
        HookProbe {
            plugin: self.name.clone(),
            symbol,
            faults: self.faults.clone(),
            journal: self.journal.clone(),
        }
    }
}

/// Records one hook call and applies its configured fault.
struct HookProbe {
    plugin: String,
    symbol: &'static str,
    faults: Arc<RwLock<HashMap<&'static str, Fault>>>,
    journal: HookJournal,
}

impl HookProbe {
    fn call(&self) -> Result<(), HookError> {
        self.journal.record(&self.plugin, self.symbol);
        let fault = self.faults.read().get(self.symbol).copied();
        match fault {
            None => Ok(()),
            Some(Fault::Fail) => {
                Err(format!("{}.{} failed on purpose", self.plugin, self.symbol).into())
            }
            Some(Fault::Panic) => panic!("{}.{} panicked on purpose", self.plugin, self.symbol),
        }
    }
}

#[macro_export]
macro_rules! assert_hook_called {
    ($journal:expr, $plugin:expr, $symbol:expr, $expected_count:expr) => {
        let count = $journal.count($plugin, $symbol);
        assert_eq!(
            count, $expected_count,
            "Expected {}.{} to be called {} times, but was called {} times",
            $plugin, $symbol, $expected_count, count
        );
    };
}
