//! Application-facing connection handle
//!
//! A [`ResourceHandle`] is what callers hold. It carries the application
//! connection and points at the [`PooledResource`] currently serving it,
//! which can change: inside a transaction several handles may share one
//! physical connection, and after completion each handle re-resolves to
//! a connection of its own.
//!
//! Handles must be closed explicitly; an unclosed handle keeps its
//! connection active until the scope is aborted.

use crate::pool::ConnectionPool;
use crate::resource::PooledResource;
use crate::scope::TransactionScope;
use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::sync::{Arc, Weak};
use tracing::trace;
use xapool_core::{ConnectionRequest, Credential, Error, Result, UserConnection};

#[derive(Default)]
struct HandleState {
    /// Connection this handle privately owns outside transactions
    own: Option<Arc<PooledResource>>,
    /// Connection currently serving the handle
    resource: Option<Arc<PooledResource>>,
    connection: Option<UserConnection>,
    scope: Option<Weak<TransactionScope>>,
    closed: bool,
    allocation_trace: Option<Arc<Backtrace>>,
}

/// A caller's lease on a pooled connection
pub struct ResourceHandle {
    id: u64,
    pool: Weak<ConnectionPool>,
    credential: Credential,
    request: ConnectionRequest,
    state: Mutex<HandleState>,
}

fn same(a: &Option<Arc<PooledResource>>, b: &PooledResource) -> bool {
    a.as_deref().map_or(false, |r| std::ptr::eq(r, b))
}

impl ResourceHandle {
    pub(crate) fn new(
        pool: &Arc<ConnectionPool>,
        credential: Credential,
        request: ConnectionRequest,
    ) -> Arc<Self> {
        Arc::new(ResourceHandle {
            id: pool.next_id(),
            pool: Arc::downgrade(pool),
            credential,
            request,
            state: Mutex::new(HandleState::default()),
        })
    }

    /// Pool-unique id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The application connection
    pub fn connection(&self) -> Result<UserConnection> {
        let state = self.state.lock();
        if state.closed {
            return Err(Error::illegal_state(format!("connection handle {} is closed", self.id)));
        }
        state
            .connection
            .clone()
            .ok_or_else(|| Error::illegal_state(format!("connection handle {} is not bound", self.id)))
    }

    /// Physical connection currently serving this handle
    pub fn resource(&self) -> Option<Arc<PooledResource>> {
        self.state.lock().resource.clone()
    }

    /// Physical connection this handle owns, if any
    pub fn owner(&self) -> Option<Arc<PooledResource>> {
        self.state.lock().own.clone()
    }

    /// True once closed, by the caller or by connection destruction
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Credential the handle was allocated with
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Request the handle was allocated with
    pub fn request(&self) -> &ConnectionRequest {
        &self.request
    }

    /// Backtrace of the allocation, if the pool saves them
    pub fn allocation_trace(&self) -> Option<Arc<Backtrace>> {
        self.state.lock().allocation_trace.clone()
    }

    /// Release the handle; the connection idles once nothing uses it
    pub fn close(&self) {
        if let Some(resource) = self.release() {
            resource.detach_handle(self);
        }
    }

    /// Release the handle and destroy its physical connection
    pub fn abort(&self) {
        if let Some(resource) = self.release() {
            resource.destroy();
        }
    }

    /// Mark closed and unlink from the scope; returns the serving connection
    fn release(&self) -> Option<Arc<PooledResource>> {
        let (resource, scope) = {
            let mut state = self.state.lock();
            if state.closed {
                return None;
            }
            state.closed = true;
            state.own = None;
            state.connection = None;
            (state.resource.take(), state.scope.take())
        };
        trace!(handle = self.id, "close");
        if let Some(scope) = scope.and_then(|s| s.upgrade()) {
            scope.forget_handle(self);
        }
        resource
    }

    // ========================================================================
    // Pool internals
    // ========================================================================

    pub(crate) fn is_from(&self, pool: &ConnectionPool) -> bool {
        std::ptr::eq(self.pool.as_ptr(), pool)
    }

    pub(crate) fn user_connection(&self) -> Option<UserConnection> {
        self.state.lock().connection.clone()
    }

    pub(crate) fn set_user_connection(&self, connection: UserConnection) {
        self.state.lock().connection = Some(connection);
    }

    pub(crate) fn owns(&self, resource: &PooledResource) -> bool {
        same(&self.state.lock().own, resource)
    }

    pub(crate) fn set_own(&self, resource: Option<Arc<PooledResource>>) {
        self.state.lock().own = resource;
    }

    pub(crate) fn bind(&self, resource: &Arc<PooledResource>) {
        self.state.lock().resource = Some(Arc::clone(resource));
    }

    pub(crate) fn unbind(&self, resource: &PooledResource) {
        let mut state = self.state.lock();
        if same(&state.resource, resource) {
            state.resource = None;
        }
    }

    /// Move onto a shared connection; returns the one previously serving
    pub(crate) fn rebind_shared(&self, resource: &Arc<PooledResource>) -> Option<Arc<PooledResource>> {
        let mut state = self.state.lock();
        state.own = None;
        let previous = state.resource.replace(Arc::clone(resource));
        previous.filter(|p| !Arc::ptr_eq(p, resource))
    }

    pub(crate) fn set_scope(&self, scope: Weak<TransactionScope>) {
        self.state.lock().scope = Some(scope);
    }

    pub(crate) fn set_allocation_trace(&self, trace: Arc<Backtrace>) {
        self.state.lock().allocation_trace = Some(trace);
    }

    /// Connection destroyed underneath the handle
    pub(crate) fn invalidate(&self, resource: &PooledResource) {
        {
            let mut state = self.state.lock();
            if same(&state.own, resource) {
                state.own = None;
            }
        }
        self.release();
    }

    /// Re-resolve after a transaction: back onto the owned connection, or
    /// onto a fresh one from the pool
    pub(crate) fn reassociate(self: &Arc<Self>) -> Result<()> {
        let (closed, own) = {
            let state = self.state.lock();
            (state.closed, state.own.clone())
        };
        if closed {
            return Ok(());
        }
        match own {
            Some(resource) => {
                resource.attach_handle(self);
                Ok(())
            }
            None => {
                let pool = self
                    .pool
                    .upgrade()
                    .ok_or_else(|| Error::PoolClosed(format!("handle {}", self.id)))?;
                pool.allocate_pool_connection(&self.credential, &self.request, Some(self))?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("resource", &state.resource.as_ref().map(|r| r.id()))
            .field("closed", &state.closed)
            .finish()
    }
}
