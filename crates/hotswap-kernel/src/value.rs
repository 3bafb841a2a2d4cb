//! Opaque values crossing the plugin boundary

use std::any::Any;
use std::sync::Arc;

/// An opaque, shareable value: exports, live functions, data-bag entries,
/// invoke parameters and results.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Opaque init data handed to every load hook of a generation.
pub type InitData = dyn Any + Send + Sync;

/// Error returned by plugin hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a load or init hook.
pub type HookResult = Result<(), HookError>;

/// Zero-argument factory registered as a live type.
pub type LiveTypeFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Wrap a concrete value so it can be exported or stored in the vault.
///
/// Dependents receive the value through a [`Slot`](crate::Slot) of the same
/// type `T`, so trait objects should be exported as `Arc<dyn Trait>`.
pub fn export<T>(value: T) -> Value
where
    T: Send + Sync + 'static,
{
    Arc::new(value)
}

/// Downcast a [`Value`] by reference.
pub fn downcast_ref<T: 'static>(value: &Value) -> Option<&T> {
    value.as_ref().downcast_ref::<T>()
}
