//! Hotswap Runtime
//!
//! Loads generations of native plugins and swaps them while the process keeps
//! running.
//!
//! - [`PluginManagerSwapper`] owns the published generation. Readers call
//!   [`current`](PluginManagerSwapper::current) without locking; loads and
//!   reloads are serialized.
//! - [`PluginManager`] is one generation: it diffs against its predecessor,
//!   wires dependencies, orders plugins and drives their hooks.
//! - [`Plugin`] is one loaded unit, shared by reference between the
//!   generations that carry it over.
//!
//! ```rust,ignore
//! use hotswap_runtime::{PluginManagerSwapper, SwapperConfig};
//!
//! let swapper = PluginManagerSwapper::new(SwapperConfig::new("plugins"));
//! let details = swapper.load_plugins(&())?;
//! println!("{details}");
//!
//! // later, after the artifacts were rebuilt
//! let details = swapper.reload(&())?;
//! if let Some(mgr) = swapper.current() {
//!     mgr.invoke_each("refresh", &[]);
//! }
//! ```

pub mod error;
mod hook;
pub mod loader;
pub mod manager;
pub mod plugin;
pub mod settings;
pub mod static_plugin;
pub mod swapper;

pub use error::{HotswapError, HotswapResult};
pub use loader::{
    Artifact, ArtifactLoader, Fingerprint, NativeLibrary, NativeLoader, SymbolSource, SymbolTable,
    TableLoader,
};
pub use manager::{
    Candidate, Checkpoint, ExtensionFactory, FaultInjector, ManagerState, OpenObserver,
    PluginManager,
};
pub use plugin::{LoadedPlugin, Note, Plugin, PluginFuncs, PluginSummary};
pub use settings::{HotswapSettings, SettingsError, load_settings, load_settings_with_env};
pub use static_plugin::{StaticPlugin, StaticRegistry};
pub use swapper::{
    DEFAULT_FREE_DELAY, Details, MIN_FREE_DELAY, PluginManagerSwapper, PluginSource,
    ReloadCallback, SwapperConfig,
};

pub use hotswap_kernel as kernel;
