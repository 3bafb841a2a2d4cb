//! Dependency declarations
//!
//! A plugin's import hook returns an [`Imports`] list naming the plugins it
//! depends on. The runtime matches each name case-insensitively against the
//! plugins of the same generation, records the edge and injects the
//! dependency's exported value into the declared [`Slot`] when the types match.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::value::Value;

/// Type-erased receiver for an injected dependency value.
pub trait DependencySlot: Send + Sync {
    /// Name of the type this slot accepts.
    fn expected_type(&self) -> &'static str;

    /// Store `value` if it has the accepted type. Returns `false` otherwise.
    fn assign(&self, value: &Value) -> bool;
}

/// Shared cell holding the value injected for one dependency.
///
/// Clones share the same storage, so a plugin keeps one clone and hands
/// another to [`Imports`].
pub struct Slot<T> {
    inner: Arc<RwLock<Option<T>>>,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// Whether a value has been injected.
    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}

impl<T: Clone> Slot<T> {
    /// The injected value, if any.
    pub fn get(&self) -> Option<T> {
        self.inner.read().clone()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("type", &type_name::<T>())
            .field("set", &self.is_set())
            .finish()
    }
}

impl<T> DependencySlot for Slot<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn expected_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn assign(&self, value: &Value) -> bool {
        match value.as_ref().downcast_ref::<T>() {
            Some(v) => {
                *self.inner.write() = Some(v.clone());
                true
            }
            None => false,
        }
    }
}

/// How a dependency was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyKind {
    /// Depends on the plugin with this name
    Named(String),
    /// Declared but skipped by the resolver
    Ignored(String),
    /// Declared by type only; the resolver rejects it
    Anonymous,
}

/// One entry of an [`Imports`] list.
#[derive(Clone)]
pub struct Dependency {
    kind: DependencyKind,
    slot: Arc<dyn DependencySlot>,
}

impl Dependency {
    pub fn kind(&self) -> &DependencyKind {
        &self.kind
    }

    pub fn slot(&self) -> &dyn DependencySlot {
        self.slot.as_ref()
    }

    /// Name of the expected type, used in error messages.
    pub fn expected_type(&self) -> &'static str {
        self.slot.expected_type()
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("kind", &self.kind)
            .field("expected_type", &self.expected_type())
            .finish()
    }
}

/// Ordered list of dependencies returned by a plugin's import hook.
#[derive(Clone, Debug, Default)]
pub struct Imports {
    deps: Vec<Dependency>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depend on the plugin called `name`, receiving its export in `slot`.
    pub fn with<T>(mut self, name: impl Into<String>, slot: &Slot<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.deps.push(Dependency {
            kind: DependencyKind::Named(name.into()),
            slot: Arc::new(slot.clone()),
        });
        self
    }

    /// Declare a dependency the resolver must skip.
    pub fn with_ignored<T>(mut self, name: impl Into<String>, slot: &Slot<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.deps.push(Dependency {
            kind: DependencyKind::Ignored(name.into()),
            slot: Arc::new(slot.clone()),
        });
        self
    }

    /// Declare a dependency by type only. Loading always rejects it.
    pub fn embed<T>(mut self, slot: &Slot<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.deps.push(Dependency {
            kind: DependencyKind::Anonymous,
            slot: Arc::new(slot.clone()),
        });
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.deps.iter()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}
