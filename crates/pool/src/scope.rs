//! Per-thread transaction scope
//!
//! A [`TransactionScope`] ties one [`TransactionCoordinator`] to the
//! connection handles a unit of work has checked out. Handles allocated
//! inside a transaction are enlisted at once; handles cached before
//! `begin` are enlisted by `begin`.
//!
//! ## Locking
//!
//! The coordinator mutex is taken before the scope state mutex. Calls
//! into the coordinator that reach participants (enlist, commit, rollback)
//! run with the state mutex released, because participants call back into
//! the scope to find join heads and to unlink themselves.

use crate::handle::ResourceHandle;
use crate::pool::ConnectionPool;
use crate::resource::PooledResource;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};
use xapool_coordinator::{TransactionCoordinator, TransactionManager};
use xapool_core::{
    BeginCallback, CloseCallback, ConnectionRequest, Credential, Error, Result, Synchronization,
    TransactionId, TransactionStatus, XaResource,
};

#[derive(Default)]
struct ScopeState {
    /// Handles checked out through this scope and still open
    handles: Vec<Arc<ResourceHandle>>,
    /// Connections enlisted in the current transaction
    resources: Vec<Arc<PooledResource>>,
    begin_callbacks: Vec<Arc<dyn BeginCallback>>,
    close_callbacks: Vec<Arc<dyn CloseCallback>>,
    active: bool,
    in_context: bool,
}

/// A transaction detached from its scope by [`TransactionScope::suspend`]
pub struct SuspendedTransaction {
    coordinator: TransactionCoordinator,
    resources: Vec<Arc<PooledResource>>,
}

impl SuspendedTransaction {
    /// Root id of the suspended transaction
    pub fn xid(&self) -> Option<&TransactionId> {
        self.coordinator.xid()
    }

    /// Status of the suspended transaction
    pub fn status(&self) -> TransactionStatus {
        self.coordinator.status()
    }
}

impl std::fmt::Debug for SuspendedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendedTransaction")
            .field("coordinator", &self.coordinator)
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// Transaction context of one unit of work
pub struct TransactionScope {
    manager: Arc<TransactionManager>,
    self_ref: Weak<TransactionScope>,
    coordinator: Mutex<TransactionCoordinator>,
    state: Mutex<ScopeState>,
}

impl TransactionScope {
    /// Scope with no transaction
    pub fn new(manager: Arc<TransactionManager>) -> Arc<Self> {
        Arc::new_cyclic(|me| TransactionScope {
            coordinator: Mutex::new(manager.new_coordinator()),
            manager,
            self_ref: me.clone(),
            state: Mutex::new(ScopeState::default()),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Transaction manager of the scope
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Status of the current transaction
    pub fn status(&self) -> TransactionStatus {
        self.coordinator.lock().status()
    }

    /// Root id of the current transaction
    pub fn xid(&self) -> Option<TransactionId> {
        self.coordinator.lock().xid().cloned()
    }

    /// True between a successful `begin` and completion
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Number of enlisted participants
    pub fn enlisted_count(&self) -> usize {
        self.coordinator.lock().enlisted_count()
    }

    /// Number of open handles tracked by the scope
    pub fn handle_count(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// True while a caller has the scope bound as its current context
    pub fn in_context(&self) -> bool {
        self.state.lock().in_context
    }

    /// Mark the scope bound or unbound
    pub fn set_in_context(&self, in_context: bool) {
        self.state.lock().in_context = in_context;
    }

    /// Run `f` with the coordinator locked
    ///
    /// `f` must not call back into this scope.
    pub fn with_coordinator<R>(&self, f: impl FnOnce(&mut TransactionCoordinator) -> R) -> R {
        f(&mut self.coordinator.lock())
    }

    // ========================================================================
    // Transaction control
    // ========================================================================

    /// Start a transaction and enlist every cached connection
    pub fn begin(&self) -> Result<()> {
        let mut coord = self.coordinator.lock();
        if self.state.lock().active {
            return Err(Error::illegal_state(
                "begin is not allowed because an active transaction already exists; \
                 commit or roll back before starting a new one",
            ));
        }
        coord.begin()?;

        let handles = {
            let mut state = self.state.lock();
            state.active = true;
            state.resources.clear();
            state.handles.clone()
        };

        let mut resources: Vec<Arc<PooledResource>> = Vec::new();
        for handle in &handles {
            for resource in resources.iter().rev() {
                if resource.share(handle) {
                    break;
                }
            }
            if let Some(resource) = handle.resource() {
                if !resources.iter().any(|r| Arc::ptr_eq(r, &resource)) {
                    resources.push(resource);
                }
            }
        }
        self.state.lock().resources = resources.clone();

        let single = resources.len() == 1;
        let mut failure = None;
        for resource in &resources {
            resource.enable_local_transaction_optimization(single);
            resource.set_scope(self.self_ref.clone(), coord.rollback_signal());
            if let Err(e) = coord.enlist(Arc::clone(resource) as Arc<dyn XaResource>) {
                error!(resource = %resource, error = %e, "enlist failed during begin");
                failure = Some(e);
                break;
            }
        }

        if let Some(e) = failure {
            warn!(xid = ?coord.xid(), "rolling back transaction from failed begin");
            let enlisted = {
                let mut state = self.state.lock();
                state.active = false;
                state.handles.clear();
                std::mem::take(&mut state.resources)
            };
            // errored connections are destroyed, never idled, once rolled back
            for resource in &enlisted {
                resource.set_connection_error();
            }
            if let Err(rb) = coord.rollback() {
                debug!(error = %rb, "rollback after failed begin");
            }
            for resource in enlisted {
                resource.destroy();
            }
            return Err(Error::system(format!("failed to begin transaction: {}", e), None));
        }

        let callbacks = self.state.lock().begin_callbacks.clone();
        if let Some(xid) = coord.xid() {
            for callback in callbacks {
                if let Err(e) = callback.begin(xid) {
                    warn!(xid = %xid, error = %e, "begin callback failed");
                }
            }
        }
        Ok(())
    }

    /// Commit the current transaction
    pub fn commit(&self) -> Result<()> {
        let mut coord = self.coordinator.lock();
        let result = if self.state.lock().active {
            coord.commit()
        } else {
            Err(Error::illegal_state(
                "commit requires an active transaction; either begin() is missing \
                 or the transaction has already completed",
            ))
        };
        self.finish();
        result
    }

    /// Roll back the current transaction
    pub fn rollback(&self) -> Result<()> {
        let mut coord = self.coordinator.lock();
        let result = coord.rollback();
        self.finish();
        result
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.resources.clear();
        state.active = false;
    }

    /// Mark the current transaction rollback-only
    pub fn set_rollback_only(&self) -> Result<()> {
        self.coordinator.lock().set_rollback_only()
    }

    /// Mark the current transaction rollback-only, recording `cause`
    pub fn set_rollback_only_with(&self, cause: impl Into<String>) -> Result<()> {
        self.coordinator.lock().set_rollback_only_with(cause)
    }

    /// Timeout in seconds; `0` restores the default
    pub fn set_transaction_timeout(&self, seconds: i32) {
        self.coordinator.lock().set_transaction_timeout(seconds);
    }

    /// Register a completion callback
    pub fn register_synchronization(&self, sync: Arc<dyn Synchronization>) {
        self.coordinator.lock().register_synchronization(sync);
    }

    /// Register a callback run before ordinary synchronizations
    pub fn register_interposed_synchronization(&self, sync: Arc<dyn Synchronization>) {
        self.coordinator.lock().register_interposed_synchronization(sync);
    }

    /// Register a callback run at every `begin`; runs at once when a
    /// transaction is already in progress
    pub fn enlist_begin_callback(&self, callback: Arc<dyn BeginCallback>) -> Result<()> {
        let coord = self.coordinator.lock();
        self.state.lock().begin_callbacks.push(Arc::clone(&callback));
        if let Some(xid) = coord.xid() {
            callback.begin(xid)?;
        }
        Ok(())
    }

    /// Register a callback run by [`abort`](Self::abort)
    pub fn enlist_close_callback(&self, callback: Arc<dyn CloseCallback>) {
        self.state.lock().close_callbacks.push(callback);
    }

    // ========================================================================
    // Suspend / resume
    // ========================================================================

    /// Detach the running transaction; the scope is left with none
    pub fn suspend(&self) -> Result<SuspendedTransaction> {
        let mut coord = self.coordinator.lock();
        if !self.state.lock().active {
            return Err(Error::illegal_state("no active transaction to suspend"));
        }
        coord.suspend()?;

        let coordinator = std::mem::replace(&mut *coord, self.manager.new_coordinator());
        let resources = {
            let mut state = self.state.lock();
            state.active = false;
            std::mem::take(&mut state.resources)
        };
        debug!(xid = ?coordinator.xid(), "scope suspended");
        Ok(SuspendedTransaction {
            coordinator,
            resources,
        })
    }

    /// Re-attach a suspended transaction
    pub fn resume(&self, suspended: SuspendedTransaction) -> Result<()> {
        let mut coord = self.coordinator.lock();
        if self.state.lock().active || coord.status() != TransactionStatus::NoTransaction {
            return Err(Error::illegal_state(
                "resume requires a scope without a transaction",
            ));
        }

        let mut previous = std::mem::replace(&mut *coord, suspended.coordinator);
        previous.close();
        coord.resume()?;

        let mut state = self.state.lock();
        state.active = true;
        state.resources.extend(suspended.resources);
        debug!(xid = ?coord.xid(), "scope resumed");
        Ok(())
    }

    // ========================================================================
    // Abort
    // ========================================================================

    /// End the unit of work: roll back a dangling transaction, run close
    /// callbacks and close connections left open
    ///
    /// Returns `IllegalState` if anything was left dangling. A second call
    /// finds nothing and succeeds.
    pub fn abort(&self) -> Result<()> {
        let mut coord = self.coordinator.lock();
        let mut dangling = Vec::new();

        self.state.lock().in_context = false;

        if coord.status() != TransactionStatus::NoTransaction {
            let xid = coord.xid().cloned();
            warn!(xid = ?xid, "rolling back dangling transaction");
            dangling.push(format!("transaction {:?} was not completed", xid));
            if let Err(e) = coord.rollback() {
                debug!(error = %e, "rollback of dangling transaction failed");
            }
            self.finish();
        }

        let (close_callbacks, handles) = {
            let mut state = self.state.lock();
            state.begin_callbacks.clear();
            state.active = false;
            (
                std::mem::take(&mut state.close_callbacks),
                std::mem::take(&mut state.handles),
            )
        };
        drop(coord);

        for callback in close_callbacks.iter().rev() {
            callback.close();
        }

        let mut warned = false;
        for handle in handles {
            if handle.is_closed() || !close_dangling(&handle) {
                continue;
            }
            dangling.push(format!("connection handle {} was not closed", handle.id()));
            if !warned {
                warn!(handle = handle.id(), "closing dangling connection");
                warned = true;
            }
            if let Some(trace) = handle.allocation_trace() {
                debug!(handle = handle.id(), trace = %trace, "dangling connection allocated here");
            }
            handle.abort();
        }

        self.coordinator.lock().set_transaction_timeout(0);

        if dangling.is_empty() {
            Ok(())
        } else {
            Err(Error::illegal_state(dangling.join("; ")))
        }
    }

    // ========================================================================
    // Pool internals
    // ========================================================================

    /// Share a connection already enlisted here
    pub(crate) fn allocate_shared(
        &self,
        pool: &Arc<ConnectionPool>,
        credential: &Credential,
        request: &ConnectionRequest,
    ) -> Option<Arc<ResourceHandle>> {
        let resources = {
            let state = self.state.lock();
            if !state.active {
                return None;
            }
            state.resources.clone()
        };
        resources
            .iter()
            .find_map(|r| r.allocate_shared(pool, credential, request))
    }

    /// Track a new handle and enlist its connection if a transaction runs
    pub(crate) fn enlist_handle(&self, handle: &Arc<ResourceHandle>) -> Result<()> {
        let mut coord = self.coordinator.lock();
        let active = {
            let state = self.state.lock();
            if state.handles.iter().any(|h| Arc::ptr_eq(h, handle)) {
                return Ok(());
            }
            state.active
        };

        if active && coord.status() == TransactionStatus::Active {
            if let Some(resource) = handle.resource() {
                self.enlist_resource(&mut coord, &resource)?;
            }
        }

        self.state.lock().handles.push(Arc::clone(handle));
        handle.set_scope(self.self_ref.clone());
        Ok(())
    }

    fn enlist_resource(
        &self,
        coord: &mut TransactionCoordinator,
        resource: &Arc<PooledResource>,
    ) -> Result<()> {
        if !resource.supports_transaction() {
            return Ok(());
        }
        if self
            .state
            .lock()
            .resources
            .iter()
            .any(|r| Arc::ptr_eq(r, resource))
        {
            return Ok(());
        }

        resource.set_scope(self.self_ref.clone(), coord.rollback_signal());
        if coord.allow_local_transaction_optimization() {
            resource.enable_local_transaction_optimization(true);
        }
        if resource.xid().is_none() {
            coord.enlist(Arc::clone(resource) as Arc<dyn XaResource>)?;
        }

        self.state.lock().resources.push(Arc::clone(resource));
        Ok(())
    }

    /// Enlisted connection whose branch `resource` joins
    pub(crate) fn find_join(
        &self,
        resource: &PooledResource,
        xid: &TransactionId,
    ) -> Option<Arc<PooledResource>> {
        let resources = self.state.lock().resources.clone();
        resources.into_iter().find(|r| r.is_join(resource, xid))
    }

    pub(crate) fn forget_resource(&self, resource: &PooledResource) {
        self.state
            .lock()
            .resources
            .retain(|r| !std::ptr::eq(r.as_ref(), resource));
    }

    pub(crate) fn forget_handle(&self, handle: &ResourceHandle) {
        self.state
            .lock()
            .handles
            .retain(|h| !std::ptr::eq(h.as_ref(), handle));
    }
}

fn close_dangling(handle: &ResourceHandle) -> bool {
    handle
        .resource()
        .map_or(true, |r| r.close_dangling_connections())
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransactionScope")
            .field("active", &state.active)
            .field("handles", &state.handles.len())
            .field("resources", &state.resources.len())
            .finish()
    }
}
