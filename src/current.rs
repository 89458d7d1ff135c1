//! Thread-bound scope lookup for call sites that cannot pass a scope
//!
//! Pools never consult this module; it only serves callers that want an
//! ambient "current transaction". A process may install one global
//! environment, from which a thread's scope is created on first use.

use crate::environment::TransactionEnvironment;
use once_cell::sync::OnceCell;
use std::cell::RefCell;
use std::sync::Arc;
use xapool_core::{Error, Result};
use xapool_pool::TransactionScope;

static GLOBAL: OnceCell<Arc<TransactionEnvironment>> = OnceCell::new();

thread_local! {
    static CURRENT: RefCell<Option<Arc<TransactionScope>>> = RefCell::new(None);
}

/// Install the process-wide environment; only the first call succeeds
pub fn install_global(env: Arc<TransactionEnvironment>) -> Result<()> {
    GLOBAL
        .set(env)
        .map_err(|_| Error::illegal_state("a global transaction environment is already installed"))
}

/// The installed process-wide environment
pub fn global() -> Option<&'static Arc<TransactionEnvironment>> {
    GLOBAL.get()
}

/// Bind `scope` to this thread, returning the previously bound one
pub fn bind_current_scope(scope: Arc<TransactionScope>) -> Option<Arc<TransactionScope>> {
    scope.set_in_context(true);
    let previous = CURRENT.with(|current| current.borrow_mut().replace(scope));
    if let Some(previous) = &previous {
        previous.set_in_context(false);
    }
    previous
}

/// Unbind this thread's scope
pub fn unbind_current_scope() -> Option<Arc<TransactionScope>> {
    let previous = CURRENT.with(|current| current.borrow_mut().take());
    if let Some(previous) = &previous {
        previous.set_in_context(false);
    }
    previous
}

/// This thread's scope; created from the global environment when none is
/// bound
pub fn current_scope() -> Option<Arc<TransactionScope>> {
    if let Some(scope) = CURRENT.with(|current| current.borrow().clone()) {
        return Some(scope);
    }
    let scope = global()?.new_scope();
    bind_current_scope(Arc::clone(&scope));
    Some(scope)
}

/// Run `f` with `scope` bound, restoring the previous binding afterwards
pub fn with_scope<R>(scope: Arc<TransactionScope>, f: impl FnOnce() -> R) -> R {
    let previous = bind_current_scope(scope);
    let result = f();
    match previous {
        Some(previous) => {
            bind_current_scope(previous);
        }
        None => {
            unbind_current_scope();
        }
    }
    result
}
