//! Mock physical connections and their factory

use crate::xa::MockXaResource;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use xapool_core::{
    ConnectionRequest, Credential, LocalTransaction, ManagedConnection, ManagedConnectionFactory,
    ResourceError, UserConnection, XaResource,
};

// ============================================================================
// Local transactions
// ============================================================================

/// Local transaction counting its calls
#[derive(Debug, Default)]
pub struct MockLocalTransaction {
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_commit: AtomicBool,
}

impl MockLocalTransaction {
    /// Number of `begin` calls
    pub fn begin_count(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    /// Number of `commit` calls
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of `rollback` calls
    pub fn rollback_count(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Make `commit` fail
    pub fn set_commit_failure(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }
}

impl LocalTransaction for MockLocalTransaction {
    fn begin(&self) -> Result<(), ResourceError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&self) -> Result<(), ResourceError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(ResourceError::new("local commit failed"));
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), ResourceError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Connections
// ============================================================================

/// Application-level connection handed out by [`MockConnection`]
///
/// Remembers which physical connection it currently talks to, so tests can
/// observe rebinding.
#[derive(Debug)]
pub struct MockUserConnection {
    physical: AtomicU64,
}

impl MockUserConnection {
    /// Id of the physical connection behind this handle
    pub fn physical_id(&self) -> u64 {
        self.physical.load(Ordering::SeqCst)
    }
}

/// Downcast an application connection produced by the mock factory
pub fn user_connection(conn: &UserConnection) -> Option<&MockUserConnection> {
    conn.downcast_ref::<MockUserConnection>()
}

/// Physical connection produced by [`MockFactory`]
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    xa: Option<Arc<MockXaResource>>,
    local: Option<Arc<MockLocalTransaction>>,
    destroyed: AtomicBool,
    cleanups: AtomicUsize,
    handed_out: AtomicUsize,
}

impl MockConnection {
    /// Connection id, unique per factory
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Scripted resource manager of this connection
    pub fn xa(&self) -> Option<&Arc<MockXaResource>> {
        self.xa.as_ref()
    }

    /// Local transaction of this connection
    pub fn local(&self) -> Option<&Arc<MockLocalTransaction>> {
        self.local.as_ref()
    }

    /// True once `destroy` has been called
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Number of `cleanup` calls
    pub fn cleanup_count(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    /// Number of application connections created
    pub fn handed_out(&self) -> usize {
        self.handed_out.load(Ordering::SeqCst)
    }
}

impl ManagedConnection for MockConnection {
    fn xa_resource(&self) -> Option<Arc<dyn XaResource>> {
        self.xa
            .as_ref()
            .map(|xa| Arc::clone(xa) as Arc<dyn XaResource>)
    }

    fn local_transaction(&self) -> Option<Arc<dyn LocalTransaction>> {
        self.local
            .as_ref()
            .map(|lt| Arc::clone(lt) as Arc<dyn LocalTransaction>)
    }

    fn connection(
        &self,
        _credential: &Credential,
        _request: &ConnectionRequest,
    ) -> Result<UserConnection, ResourceError> {
        if self.is_destroyed() {
            return Err(ResourceError::new(format!("connection {} destroyed", self.id)));
        }
        self.handed_out.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockUserConnection {
            physical: AtomicU64::new(self.id),
        }))
    }

    fn associate_connection(&self, connection: &UserConnection) -> Result<(), ResourceError> {
        let user = user_connection(connection)
            .ok_or_else(|| ResourceError::new("foreign application connection"))?;
        user.physical.store(self.id, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup(&self) -> Result<(), ResourceError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) -> Result<(), ResourceError> {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Some(xa) = &self.xa {
            xa.detach();
        }
        Ok(())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Factory producing [`MockConnection`]s
///
/// By default every connection supports XA and local transactions, and all
/// connections of one factory report the same resource-manager id (the
/// factory name), so they join each other's branches.
#[derive(Debug)]
pub struct MockFactory {
    name: String,
    xa: bool,
    local: bool,
    distinct_rms: bool,
    fail_create: AtomicBool,
    next_id: AtomicU64,
    created: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockFactory {
    /// Factory with XA and local transaction support
    pub fn new(name: impl Into<String>) -> Self {
        MockFactory {
            name: name.into(),
            xa: true,
            local: true,
            distinct_rms: false,
            fail_create: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Connections without XA support
    pub fn without_xa(mut self) -> Self {
        self.xa = false;
        self
    }

    /// Connections without local transaction support
    pub fn without_local(mut self) -> Self {
        self.local = false;
        self
    }

    /// Give every connection its own resource-manager id
    pub fn distinct_rms(mut self) -> Self {
        self.distinct_rms = true;
        self
    }

    /// Make `create_managed_connection` fail
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Every connection created so far
    pub fn created(&self) -> Vec<Arc<MockConnection>> {
        self.created.lock().clone()
    }

    /// Number of connections created
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Connection with the given id
    pub fn connection(&self, id: u64) -> Option<Arc<MockConnection>> {
        self.created.lock().iter().find(|c| c.id == id).cloned()
    }
}

impl ManagedConnectionFactory for MockFactory {
    fn create_managed_connection(
        &self,
        _credential: &Credential,
        _request: &ConnectionRequest,
    ) -> Result<Arc<dyn ManagedConnection>, ResourceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ResourceError::new(format!("{}: connection refused", self.name)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let xa = self.xa.then(|| {
            let rm = if self.distinct_rms {
                format!("{}-{}", self.name, id)
            } else {
                self.name.clone()
            };
            Arc::new(MockXaResource::new(format!("{}-{}", self.name, id)).with_rm_id(rm))
        });
        let local = self.local.then(|| Arc::new(MockLocalTransaction::default()));

        let conn = Arc::new(MockConnection {
            id,
            xa,
            local,
            destroyed: AtomicBool::new(false),
            cleanups: AtomicUsize::new(0),
            handed_out: AtomicUsize::new(0),
        });
        self.created.lock().push(Arc::clone(&conn));
        Ok(conn)
    }
}
