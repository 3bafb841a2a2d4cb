//! Fault isolation for calls into plugin code
//!
//! Every call that crosses into plugin-supplied code goes through
//! [`invoke_hook`], so a panic never escapes the manager: it comes back as a
//! [`HotswapError::Panic`] carrying the plugin name, the payload and a
//! backtrace.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};

use hotswap_kernel::HookResult;

use crate::error::{HotswapError, HotswapResult};

/// Run `f`, converting a panic into an error.
pub(crate) fn invoke_hook<T>(
    plugin: Option<&str>,
    hook: &str,
    f: impl FnOnce() -> T,
) -> HotswapResult<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| HotswapError::Panic {
        plugin: plugin.map(str::to_string),
        hook: hook.to_string(),
        payload: panic_message(payload.as_ref()),
        backtrace: Backtrace::force_capture().to_string(),
    })
}

/// Run a hook that reports failure through [`HookResult`].
pub(crate) fn invoke_fallible_hook(
    plugin: &str,
    hook: &str,
    f: impl FnOnce() -> HookResult,
) -> HotswapResult<()> {
    invoke_hook(Some(plugin), hook, f)?.map_err(|source| HotswapError::Hook {
        plugin: plugin.to_string(),
        hook: hook.to_string(),
        source,
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
