//! Connection pool
//!
//! Allocation order:
//!
//! 1. a connection already enlisted in the caller's transaction, when
//!    sharing is allowed
//! 2. the oldest matching idle connection
//! 3. a new connection, while under `max_connections` and
//!    `max_create_connections`
//! 4. wait up to `connection_wait_time` for one of the above
//! 5. an overflow connection, up to `max_overflow_connections`
//!
//! Waiters block on a condition variable that is signalled whenever a
//! connection returns to the idle ring, is destroyed, or finishes opening.

use crate::config::PoolConfig;
use crate::handle::ResourceHandle;
use crate::idle::IdlePool;
use crate::resource::PooledResource;
use crate::scope::TransactionScope;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use xapool_coordinator::{RecoveryReport, TransactionManager};
use xapool_core::{
    ConnectionRequest, Credential, Error, ManagedConnectionFactory, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    New,
    Active,
    Closed,
}

/// Point-in-time pool counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Pool name
    pub name: String,
    /// Open physical connections
    pub connections: usize,
    /// Connections in the idle ring
    pub idle: usize,
    /// Connections in use
    pub active: usize,
    /// Successful allocations
    pub allocations: u64,
    /// Physical connections opened
    pub created: u64,
    /// Failed connection attempts
    pub failed: u64,
}

/// Pool of physical connections from one factory
pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ManagedConnectionFactory>,
    manager: Arc<TransactionManager>,

    resources: Mutex<Vec<Arc<PooledResource>>>,
    idle: IdlePool<Arc<PooledResource>>,
    /// When the current run of non-empty idle ring expires
    idle_expire: Mutex<Option<Instant>>,

    available: Mutex<()>,
    available_cv: Condvar,
    wait_count: AtomicUsize,
    create_count: AtomicUsize,

    lifecycle: Mutex<Lifecycle>,
    xa_enabled: AtomicBool,
    local_enabled: AtomicBool,
    next_id: AtomicU64,

    allocations: AtomicU64,
    created: AtomicU64,
    failed: AtomicU64,
}

impl ConnectionPool {
    /// Create a pool; connections are opened lazily
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn ManagedConnectionFactory>,
        manager: Arc<TransactionManager>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let pool = Arc::new(ConnectionPool {
            idle: IdlePool::new(config.max_idle_count),
            xa_enabled: AtomicBool::new(config.xa_enabled),
            local_enabled: AtomicBool::new(config.local_transactions_enabled),
            config,
            factory,
            manager,
            resources: Mutex::new(Vec::new()),
            idle_expire: Mutex::new(None),
            available: Mutex::new(()),
            available_cv: Condvar::new(),
            wait_count: AtomicUsize::new(0),
            create_count: AtomicUsize::new(0),
            lifecycle: Mutex::new(Lifecycle::New),
            next_id: AtomicU64::new(1),
            allocations: AtomicU64::new(0),
            created: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        debug!(pool = %pool.config.name, "created pool");
        Ok(pool)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Pool name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Pool options
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Transaction manager used for recovery
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Open physical connections
    pub fn connection_count(&self) -> usize {
        self.resources.lock().len()
    }

    /// Connections in the idle ring
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Connections in use
    pub fn active_count(&self) -> usize {
        self.resources
            .lock()
            .iter()
            .filter(|r| r.is_active())
            .count()
    }

    /// Threads waiting for a connection
    pub fn wait_count(&self) -> usize {
        self.wait_count.load(Ordering::SeqCst)
    }

    /// True until closed
    pub fn is_open(&self) -> bool {
        *self.lifecycle.lock() != Lifecycle::Closed
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.config.name.clone(),
            connections: self.connection_count(),
            idle: self.idle_count(),
            active: self.active_count(),
            allocations: self.allocations.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn xa_enabled(&self) -> bool {
        self.xa_enabled.load(Ordering::Relaxed)
    }

    /// The driver lacks XA; later connections skip it
    pub(crate) fn disable_xa(&self) {
        self.xa_enabled.store(false, Ordering::Relaxed);
    }

    pub(crate) fn local_enabled(&self) -> bool {
        self.local_enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn disable_local(&self) {
        self.local_enabled.store(false, Ordering::Relaxed);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Activate the pool and recover in-doubt branches of its resource
    /// manager
    ///
    /// Recovery failures are logged and absorbed; the pool still starts.
    pub fn start(&self) -> Option<RecoveryReport> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::New {
                return None;
            }
            *lifecycle = Lifecycle::Active;
        }
        info!(pool = %self.config.name, "starting pool");

        if !self.xa_enabled() {
            return None;
        }
        let connection = match self
            .factory
            .create_managed_connection(&Credential::anonymous(), &ConnectionRequest::new())
        {
            Ok(connection) => connection,
            Err(e) => {
                warn!(pool = %self.config.name, error = %e, "recovery skipped: cannot open connection");
                return None;
            }
        };

        let report = match connection.xa_resource() {
            Some(xa) => match self.manager.recover(xa.as_ref()) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(pool = %self.config.name, error = %e, "recovery failed");
                    None
                }
            },
            None => {
                self.disable_xa();
                None
            }
        };

        if let Err(e) = connection.destroy() {
            debug!(pool = %self.config.name, error = %e, "recovery connection destroy failed");
        }
        report
    }

    /// Close the pool and every connection
    pub fn close(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Closed {
                return;
            }
            *lifecycle = Lifecycle::Closed;
        }
        info!(pool = %self.config.name, "closing pool");
        self.clear();
        let _guard = self.available.lock();
        self.available_cv.notify_all();
    }

    /// Destroy every connection; the pool stays usable
    pub fn clear(&self) {
        let resources = std::mem::take(&mut *self.resources.lock());
        self.idle.clear();
        for resource in resources {
            resource.destroy();
        }
    }

    /// Mark a connection errored so it is destroyed instead of reused
    pub fn mark_for_removal(&self, id: u64) -> bool {
        let resource = self.resources.lock().iter().find(|r| r.id() == id).cloned();
        match resource {
            Some(resource) => {
                resource.set_connection_error();
                if !resource.is_active() {
                    self.idle.take_matching(|r| r.id() == id);
                    resource.destroy();
                }
                true
            }
            None => false,
        }
    }

    /// Destroy connections past their lifetime bounds; returns how many
    pub fn evict_expired(&self) -> usize {
        let snapshot: Vec<_> = self.resources.lock().clone();
        let mut evicted = 0;
        for resource in snapshot.iter().rev() {
            if !resource.check_valid(&self.config) {
                resource.destroy();
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(pool = %self.config.name, evicted, "evicted expired connections");
        }
        evicted
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Check out a connection, sharing one already enlisted in `scope`
    /// when possible, and enlist it in the scope's transaction
    pub fn allocate(
        self: &Arc<Self>,
        scope: Option<&Arc<TransactionScope>>,
        credential: &Credential,
        request: &ConnectionRequest,
    ) -> Result<Arc<ResourceHandle>> {
        let shared = scope.and_then(|s| s.allocate_shared(self, credential, request));
        let handle = match shared {
            Some(handle) => handle,
            None => self.allocate_pool_connection(credential, request, None)?,
        };

        if let Some(scope) = scope {
            if let Err(e) = scope.enlist_handle(&handle) {
                handle.close();
                return Err(e);
            }
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Idle, new, waited-for or overflow connection, in that order
    pub(crate) fn allocate_pool_connection(
        self: &Arc<Self>,
        credential: &Credential,
        request: &ConnectionRequest,
        old: Option<&Arc<ResourceHandle>>,
    ) -> Result<Arc<ResourceHandle>> {
        let deadline = Instant::now() + self.config.connection_wait_time_bound();

        loop {
            if !self.is_open() {
                return Err(Error::PoolClosed(self.config.name.clone()));
            }
            if let Some(handle) = self.allocate_idle(credential, request, old)? {
                return Ok(handle);
            }
            if self.start_create() {
                return self.create_with_permit(credential, request, old);
            }
            if !self.wait_for_available(deadline, credential, request) {
                break;
            }
        }

        if !self.is_open() {
            return Err(Error::PoolClosed(self.config.name.clone()));
        }
        self.start_create_overflow()?;
        warn!(
            pool = %self.config.name,
            max_connections = self.config.max_connections,
            "pool exhausted, opening overflow connection"
        );
        self.create_with_permit(credential, request, old)
    }

    fn allocate_idle(
        &self,
        credential: &Credential,
        request: &ConnectionRequest,
        old: Option<&Arc<ResourceHandle>>,
    ) -> Result<Option<Arc<ResourceHandle>>> {
        while self.is_open() {
            let Some(resource) = self
                .idle
                .take_matching(|r| r.matches(self.factory.as_ref(), credential, request))
            else {
                return Ok(None);
            };
            match resource.to_active(credential, request, old) {
                Ok(Some(handle)) => return Ok(Some(handle)),
                Ok(None) => {
                    debug!(resource = %resource, "discarding stale idle connection");
                    resource.destroy();
                }
                Err(e) => {
                    resource.destroy();
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    /// Reserve a creation slot within `max_connections`
    fn start_create(&self) -> bool {
        let resources = self.resources.lock();
        let creating = self.create_count.load(Ordering::SeqCst);
        if resources.len() + creating < self.config.max_connections
            && creating < self.config.max_create_connections
        {
            self.create_count.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn start_create_overflow(&self) -> Result<()> {
        let resources = self.resources.lock();
        let creating = self.create_count.load(Ordering::SeqCst);
        let limit = self.config.max_connections + self.config.max_overflow_connections;
        if resources.len() + creating < limit {
            self.create_count.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        Err(Error::PoolExhausted {
            pool: self.config.name.clone(),
            message: format!(
                "{} connections open, limit {} plus {} overflow",
                resources.len(),
                self.config.max_connections,
                self.config.max_overflow_connections
            ),
        })
    }

    fn create_with_permit(
        self: &Arc<Self>,
        credential: &Credential,
        request: &ConnectionRequest,
        old: Option<&Arc<ResourceHandle>>,
    ) -> Result<Arc<ResourceHandle>> {
        let result = self.create_connection(credential, request, old);
        self.create_count.fetch_sub(1, Ordering::SeqCst);
        self.notify_available();
        result
    }

    fn create_connection(
        self: &Arc<Self>,
        credential: &Credential,
        request: &ConnectionRequest,
        old: Option<&Arc<ResourceHandle>>,
    ) -> Result<Arc<ResourceHandle>> {
        let connection = self
            .factory
            .create_managed_connection(credential, request)
            .map_err(|e| {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Error::Resource(e)
            })?;

        let resource = PooledResource::new(self, connection);
        self.resources.lock().push(Arc::clone(&resource));

        match resource.to_active(credential, request, old) {
            Ok(Some(handle)) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Ok(handle)
            }
            Ok(None) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                resource.destroy();
                Err(Error::illegal_state(format!(
                    "new connection {} could not be activated",
                    resource
                )))
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                resource.destroy();
                Err(e)
            }
        }
    }

    /// Block until a matching idle connection or a creation slot may be
    /// free; false once `deadline` passes
    fn wait_for_available(
        &self,
        deadline: Instant,
        credential: &Credential,
        request: &ConnectionRequest,
    ) -> bool {
        let mut guard = self.available.lock();
        self.wait_count.fetch_add(1, Ordering::SeqCst);
        let result = loop {
            if !self.is_open() {
                break false;
            }
            if self.has_matching_idle(credential, request) || self.can_create() {
                break true;
            }
            if self.available_cv.wait_until(&mut guard, deadline).timed_out() {
                break self.has_matching_idle(credential, request) || self.can_create();
            }
        };
        self.wait_count.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn has_matching_idle(&self, credential: &Credential, request: &ConnectionRequest) -> bool {
        self.idle
            .snapshot()
            .iter()
            .any(|r| r.matches(self.factory.as_ref(), credential, request))
    }

    fn can_create(&self) -> bool {
        let resources = self.resources.lock();
        let creating = self.create_count.load(Ordering::SeqCst);
        resources.len() + creating < self.config.max_connections
            && creating < self.config.max_create_connections
    }

    fn notify_available(&self) {
        let _guard = self.available.lock();
        self.available_cv.notify_all();
    }

    // ========================================================================
    // Return paths
    // ========================================================================

    /// Put a released connection into the idle ring, or destroy it
    pub(crate) fn return_idle(&self, resource: Arc<PooledResource>) {
        let keep = self.is_open()
            && !resource.has_error()
            && self.resources.lock().len() <= self.config.max_connections
            && self.cleanup(&resource)
            && self.admit_idle(&resource);

        self.notify_available();
        if !keep {
            resource.destroy();
        }
    }

    fn cleanup(&self, resource: &PooledResource) -> bool {
        let Some(connection) = resource.managed_connection() else {
            return false;
        };
        match connection.cleanup() {
            Ok(()) => true,
            Err(e) => {
                debug!(resource = %resource, error = %e, "cleanup failed");
                false
            }
        }
    }

    /// Shrink when the ring has stayed non-empty past the idle timeout
    fn admit_idle(&self, resource: &Arc<PooledResource>) -> bool {
        let now = Instant::now();
        let bound = self.config.max_idle_time_bound();
        let mut expire = self.idle_expire.lock();

        if self.idle.is_empty() {
            *expire = bound.map(|t| now + t);
        }
        if matches!(*expire, Some(at) if at < now) {
            *expire = bound.map(|t| now + t);
            debug!(resource = %resource, "shrinking idle ring");
            return false;
        }
        self.idle.add(Arc::clone(resource))
    }

    /// Unlink a destroyed connection
    pub(crate) fn forget(&self, resource: &PooledResource) {
        let id = resource.id();
        self.resources.lock().retain(|r| r.id() != id);
        self.idle.take_matching(|r| r.id() == id);
        self.notify_available();
    }

}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.config.name)
            .field("connections", &self.connection_count())
            .field("idle", &self.idle_count())
            .finish()
    }
}
