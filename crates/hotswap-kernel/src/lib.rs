//! Hotswap Kernel
//!
//! The contract between the hotswap runtime and the plugins it loads. A plugin
//! crate depends on this crate only: it builds its function table out of
//! [`Symbol`]s, declares its dependencies with [`Imports`] and [`Slot`]s, and
//! receives the generation's shared [`Vault`] in its init hook.
//!
//! ## Entry points
//!
//! | Symbol | Required | Purpose |
//! |---|---|---|
//! | `hotswap_on_load` | yes | called once with the caller's init data |
//! | `hotswap_on_init` | yes | called once with the assembled vault |
//! | `hotswap_on_free` | yes | called when the last generation using the plugin is released |
//! | `hotswap_export` | yes | the value dependents receive |
//! | `hotswap_import` | yes | the plugin's dependency declarations |
//! | `hotswap_invoke` | yes | ad hoc cross-cutting calls |
//! | `hotswap_reloadable` | yes | whether later generations may replace the plugin |
//! | `hotswap_live_funcs` | no | named callables merged into the vault |
//! | `hotswap_live_types` | no | named factories merged into the vault |

pub mod imports;
pub mod symbol;
pub mod value;
pub mod vault;

pub use imports::{Dependency, DependencyKind, DependencySlot, Imports, Slot};
pub use symbol::{
    ExportFn, ImportFn, InvokeFn, LiveFuncsFn, LiveTypesFn, OnFreeFn, OnInitFn, OnLoadFn,
    ReloadableFn, Symbol, SymbolConstructor, SymbolKind,
};
pub use value::{HookError, HookResult, InitData, LiveTypeFactory, Value, downcast_ref, export};
pub use vault::Vault;
