//! The shared registry a generation of plugins populates

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::value::{LiveTypeFactory, Value};

/// Registry shared by every plugin of one generation.
///
/// The runtime fills `live_funcs` and `live_types` from the plugins'
/// enumerators before any init hook runs. Init hooks get `&mut Vault` and may
/// use `data_bag` for ad hoc signaling and `extension` to register callbacks
/// for the embedding application. Once the generation is published the vault
/// is only reachable through `&Vault`.
#[derive(Default)]
pub struct Vault {
    /// Named callables, unique across the generation
    pub live_funcs: HashMap<String, Value>,
    /// Named factories, unique across the generation
    pub live_types: HashMap<String, LiveTypeFactory>,
    /// Free-form cross-plugin data
    pub data_bag: HashMap<String, Value>,
    /// Embedder-defined value, created fresh for each generation
    pub extension: Option<Box<dyn Any + Send + Sync>>,
}

impl Vault {
    /// Create an empty vault carrying the given extension.
    pub fn new(extension: Option<Box<dyn Any + Send + Sync>>) -> Self {
        Self {
            extension,
            ..Default::default()
        }
    }

    /// Look up a live function and downcast it to its concrete callable type.
    pub fn live_func<T: 'static>(&self, name: &str) -> Option<&T> {
        self.live_funcs
            .get(name)
            .and_then(|v| v.as_ref().downcast_ref::<T>())
    }

    /// Produce a fresh instance of a live type.
    pub fn new_live_type(&self, name: &str) -> Option<Value> {
        self.live_types.get(name).map(|factory| factory())
    }

    /// Produce a fresh instance of a live type, typed.
    pub fn new_live_type_as<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.new_live_type(name).and_then(|v| v.downcast::<T>().ok())
    }

    /// Read a data-bag entry.
    pub fn data<T: 'static>(&self, name: &str) -> Option<&T> {
        self.data_bag
            .get(name)
            .and_then(|v| v.as_ref().downcast_ref::<T>())
    }

    /// Store a data-bag entry, returning the previous one.
    pub fn set_data(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.data_bag.insert(name.into(), value)
    }

    /// Borrow the extension as `T`.
    pub fn extension<T: 'static>(&self) -> Option<&T> {
        self.extension.as_ref().and_then(|e| e.downcast_ref::<T>())
    }

    /// Mutably borrow the extension as `T`. Only meaningful during init hooks.
    pub fn extension_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.extension.as_mut().and_then(|e| e.downcast_mut::<T>())
    }
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut funcs: Vec<_> = self.live_funcs.keys().collect();
        funcs.sort();
        let mut types: Vec<_> = self.live_types.keys().collect();
        types.sort();
        let mut data: Vec<_> = self.data_bag.keys().collect();
        data.sort();
        f.debug_struct("Vault")
            .field("live_funcs", &funcs)
            .field("live_types", &types)
            .field("data_bag", &data)
            .field("extension", &self.extension.is_some())
            .finish()
    }
}
