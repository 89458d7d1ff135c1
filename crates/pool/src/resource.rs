//! Pooled physical connection and its two-phase-commit participant
//!
//! A [`PooledResource`] wraps one managed connection. The coordinator
//! enlists it as an [`XaResource`]; it forwards to the driver's XA
//! interface or, for single-participant transactions, to the driver's local
//! transaction.
//!
//! ## Lifecycle
//!
//! ```text
//!            to_active                      last handle closed, no xid
//!   Idle ---------------> Active ------------------------------------> Idle
//!    |                      |                                          |
//!    | expired / error      | error recorded, once idle                | evicted
//!    v                      v                                          v
//!                         destroyed
//! ```
//!
//! ## Deferred end
//!
//! `end()` only records the flag. The driver's `end` is issued by
//! `prepare`, `commit` or `rollback`, across the whole join chain, so a
//! delist/enlist cycle inside one transaction never ends work that resumes.
//!
//! ## Join chains
//!
//! A connection joining the branch of another connection from the same
//! pool is linked into the chain head's `joined` list. The head fans `end`
//! out to every peer and clears them after completion.
//!
//! ## Locking
//!
//! State lives under one per-resource mutex. Handle re-resolution, chain
//! clearing, idling and destruction run after it is released; no resource
//! lock is held while another resource's lock is taken.

use crate::handle::ResourceHandle;
use crate::pool::ConnectionPool;
use crate::scope::TransactionScope;
use crate::PoolConfig;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::backtrace::Backtrace;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use xapool_coordinator::RollbackSignal;
use xapool_core::{
    ConnectionRequest, Credential, EndFlag, Error, LocalTransaction, ManagedConnection,
    ManagedConnectionFactory, RecoverFlag, Result, StartFlag, TransactionId, Vote, XaResource,
    XaResult,
};

struct ResourceState {
    /// Present until destroyed
    connection: Option<Arc<dyn ManagedConnection>>,
    credential: Credential,
    request: ConnectionRequest,

    /// Handles currently using this connection
    handles: Vec<Arc<ResourceHandle>>,
    scope: Option<Weak<TransactionScope>>,
    signal: Option<Arc<RollbackSignal>>,

    xid: Option<TransactionId>,
    end_flag: Option<EndFlag>,
    /// Route the transaction through the XA interface; false selects the
    /// local-transaction optimization
    use_xa: bool,
    in_local: bool,
    joined: SmallVec<[Arc<PooledResource>; 2]>,

    has_error: bool,
    event_at: Instant,
    transaction_timeout: u32,
    allocation_trace: Option<Arc<Backtrace>>,
}

/// One physical connection managed by a [`ConnectionPool`]
pub struct PooledResource {
    id: u64,
    pool_name: String,
    pool: Weak<ConnectionPool>,
    self_ref: Weak<PooledResource>,

    xa: Option<Arc<dyn XaResource>>,
    local: Option<Arc<dyn LocalTransaction>>,
    /// Driver timeout restored when the coordinator resets to 0
    default_timeout: u32,
    created_at: Instant,

    state: Mutex<ResourceState>,
}

fn expired(since: Instant, bound: Option<Duration>, now: Instant) -> bool {
    matches!(bound, Some(b) if since + b < now)
}

impl PooledResource {
    pub(crate) fn new(pool: &Arc<ConnectionPool>, connection: Arc<dyn ManagedConnection>) -> Arc<Self> {
        let xa = if pool.xa_enabled() {
            let xa = connection.xa_resource();
            if xa.is_none() {
                trace!(pool = %pool.name(), "driver has no XA support");
                pool.disable_xa();
            }
            xa
        } else {
            None
        };
        let default_timeout = match &xa {
            Some(xa) => xa.transaction_timeout().unwrap_or_else(|e| {
                debug!(pool = %pool.name(), error = %e, "failed to read driver timeout");
                0
            }),
            None => 0,
        };
        let local = if pool.local_enabled() {
            let local = connection.local_transaction();
            if local.is_none() {
                trace!(pool = %pool.name(), "driver has no local transactions");
                pool.disable_local();
            }
            local
        } else {
            None
        };

        let now = Instant::now();
        let use_xa = xa.is_some();
        let resource = Arc::new_cyclic(|me| PooledResource {
            id: pool.next_id(),
            pool_name: pool.name().to_string(),
            pool: Arc::downgrade(pool),
            self_ref: me.clone(),
            xa,
            local,
            default_timeout,
            created_at: now,
            state: Mutex::new(ResourceState {
                connection: Some(connection),
                credential: Credential::anonymous(),
                request: ConnectionRequest::new(),
                handles: Vec::new(),
                scope: None,
                signal: None,
                xid: None,
                end_flag: None,
                use_xa,
                in_local: false,
                joined: SmallVec::new(),
                has_error: false,
                event_at: now,
                transaction_timeout: 0,
                allocation_trace: None,
            }),
        });
        debug!(resource = %resource, "create");
        resource
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Pool-unique id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True while handles are attached or a transaction is associated
    pub fn is_active(&self) -> bool {
        let state = self.state.lock();
        !state.handles.is_empty() || state.xid.is_some()
    }

    /// True once destroyed
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().connection.is_none()
    }

    /// True once a fatal error was recorded
    pub fn has_error(&self) -> bool {
        self.state.lock().has_error
    }

    /// Record a fatal error; the connection is destroyed once idle
    pub fn set_connection_error(&self) {
        self.state.lock().has_error = true;
    }

    /// Branch this connection is associated with
    pub fn xid(&self) -> Option<TransactionId> {
        self.state.lock().xid.clone()
    }

    /// Number of attached handles
    pub fn handle_count(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Number of peers joined to this connection's branch
    pub fn joined_count(&self) -> usize {
        self.state.lock().joined.len()
    }

    /// True if the next transaction will use the driver's local transaction
    pub fn uses_local_transaction(&self) -> bool {
        !self.state.lock().use_xa
    }

    /// The managed connection, until destroyed
    pub fn managed_connection(&self) -> Option<Arc<dyn ManagedConnection>> {
        self.state.lock().connection.clone()
    }

    /// When the connection was opened
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Backtrace of the last allocation, if traces are saved
    pub fn allocation_trace(&self) -> Option<Arc<Backtrace>> {
        self.state.lock().allocation_trace.clone()
    }

    fn me(&self) -> Option<Arc<PooledResource>> {
        self.self_ref.upgrade()
    }

    fn pool(&self) -> Option<Arc<ConnectionPool>> {
        self.pool.upgrade()
    }

    pub(crate) fn is_from(&self, pool: &ConnectionPool) -> bool {
        std::ptr::eq(self.pool.as_ptr(), pool)
    }

    pub(crate) fn close_dangling_connections(&self) -> bool {
        self.pool()
            .map_or(true, |p| p.config().close_dangling_connections)
    }

    pub(crate) fn supports_transaction(&self) -> bool {
        self.xa.is_some() || self.local.is_some()
    }

    pub(crate) fn matches(
        &self,
        factory: &dyn ManagedConnectionFactory,
        credential: &Credential,
        request: &ConnectionRequest,
    ) -> bool {
        let connection = self.state.lock().connection.clone();
        connection.map_or(false, |c| factory.matches(c.as_ref(), credential, request))
    }

    // ========================================================================
    // Checkout
    // ========================================================================

    /// Activate for a caller, binding a new handle or re-pointing `old`
    ///
    /// Returns `None` when the connection is expired, errored or cannot
    /// produce an application connection; the caller destroys it.
    pub(crate) fn to_active(
        &self,
        credential: &Credential,
        request: &ConnectionRequest,
        old: Option<&Arc<ResourceHandle>>,
    ) -> Result<Option<Arc<ResourceHandle>>> {
        let pool = self
            .pool()
            .ok_or_else(|| Error::PoolClosed(self.pool_name.clone()))?;
        let me = self
            .me()
            .ok_or_else(|| Error::illegal_state("resource is being dropped"))?;
        let config = pool.config();
        let now = Instant::now();

        let mut state = self.state.lock();
        if state.has_error
            || expired(state.event_at, config.max_idle_time_bound(), now)
            || expired(self.created_at, config.max_pool_time_bound(), now)
        {
            return Ok(None);
        }
        if !state.handles.is_empty() {
            return Err(Error::illegal_state(format!(
                "trying to activate active resource {}",
                self
            )));
        }
        let Some(connection) = state.connection.clone() else {
            return Ok(None);
        };

        state.event_at = now;
        // local-transaction optimization is off until the scope enables it
        state.use_xa = self.xa.is_some();

        let handle = match old {
            Some(old) => {
                if let Some(conn) = old.user_connection() {
                    if let Err(e) = connection.associate_connection(&conn) {
                        warn!(resource = %self, error = %e, "failed to re-point connection");
                        return Ok(None);
                    }
                }
                Arc::clone(old)
            }
            None => ResourceHandle::new(&pool, credential.clone(), request.clone()),
        };

        if handle.user_connection().is_none() {
            match connection.connection(credential, request) {
                Ok(conn) => handle.set_user_connection(conn),
                Err(e) => {
                    warn!(resource = %self, error = %e, "failed to obtain connection");
                    return Ok(None);
                }
            }
        }

        state.credential = credential.clone();
        state.request = request.clone();
        state.handles.push(Arc::clone(&handle));
        handle.set_own(Some(Arc::clone(&me)));
        handle.bind(&me);

        if config.save_allocation_trace {
            let trace = Arc::new(Backtrace::force_capture());
            state.allocation_trace = Some(Arc::clone(&trace));
            handle.set_allocation_trace(trace);
        }

        debug!(resource = %self, handle = handle.id(), "allocate");
        Ok(Some(handle))
    }

    /// New handle on this connection for another caller in the same
    /// transaction
    pub(crate) fn allocate_shared(
        &self,
        pool: &Arc<ConnectionPool>,
        credential: &Credential,
        request: &ConnectionRequest,
    ) -> Option<Arc<ResourceHandle>> {
        if !self.is_from(pool) {
            return None;
        }
        let me = self.me()?;
        let mut state = self.state.lock();
        let connection = state.connection.clone()?;

        if state.credential != *credential || state.request != *request || state.has_error {
            return None;
        }
        if !state.handles.is_empty() && !pool.config().shareable {
            return None;
        }

        let conn = match connection.connection(credential, request) {
            Ok(conn) => conn,
            Err(e) => {
                debug!(resource = %self, error = %e, "shared allocation failed");
                return None;
            }
        };
        let handle = ResourceHandle::new(pool, credential.clone(), request.clone());
        handle.set_user_connection(conn);
        state.handles.push(Arc::clone(&handle));
        handle.bind(&me);

        trace!(resource = %self, handle = handle.id(), "sharing");
        Some(handle)
    }

    /// Re-point a handle checked out before `begin` onto this connection
    ///
    /// Declined unless the pool allows sharing cached handles; sharing is
    /// never needed for correctness.
    pub(crate) fn share(&self, handle: &Arc<ResourceHandle>) -> bool {
        if handle.owns(self) {
            return true;
        }
        let (Some(pool), Some(me)) = (self.pool(), self.me()) else {
            return false;
        };
        let config = pool.config();
        if !config.shareable || !config.share_cached_handles || !handle.is_from(&pool) {
            return false;
        }

        {
            let mut state = self.state.lock();
            let Some(connection) = state.connection.clone() else {
                return false;
            };
            if state.has_error
                || state.credential != *handle.credential()
                || state.request != *handle.request()
            {
                return false;
            }
            if let Some(conn) = handle.user_connection() {
                if let Err(e) = connection.associate_connection(&conn) {
                    debug!(resource = %self, error = %e, "share declined");
                    return false;
                }
            }
            state.handles.push(Arc::clone(handle));
        }

        trace!(resource = %self, handle = handle.id(), "sharing cached handle");
        if let Some(previous) = handle.rebind_shared(&me) {
            previous.detach_handle(handle);
        }
        true
    }

    pub(crate) fn attach_handle(&self, handle: &Arc<ResourceHandle>) {
        let Some(me) = self.me() else {
            return;
        };
        {
            let mut state = self.state.lock();
            if !state.handles.iter().any(|h| Arc::ptr_eq(h, handle)) {
                state.handles.push(Arc::clone(handle));
            }
        }
        handle.bind(&me);
    }

    /// Drop a handle; idles the connection when it was the last one
    pub(crate) fn detach_handle(&self, handle: &ResourceHandle) {
        let now_unused = {
            let mut state = self.state.lock();
            state.handles.retain(|h| !std::ptr::eq(h.as_ref(), handle));
            state.handles.is_empty()
        };
        handle.unbind(self);
        if now_unused {
            self.to_idle();
        }
    }

    // ========================================================================
    // Transaction plumbing
    // ========================================================================

    pub(crate) fn set_scope(&self, scope: Weak<TransactionScope>, signal: Arc<RollbackSignal>) {
        let mut state = self.state.lock();
        state.scope = Some(scope);
        state.signal = Some(signal);
    }

    /// Choose between the local-transaction optimization and XA
    pub(crate) fn enable_local_transaction_optimization(&self, enable: bool) {
        let Some(pool) = self.pool() else {
            return;
        };
        let config = pool.config();
        let use_xa = if self.xa.is_none() {
            false
        } else if self.local.is_none()
            || !config.local_transaction_optimization
            || !config.shareable
        {
            true
        } else {
            !enable
        };
        self.state.lock().use_xa = use_xa;
    }

    /// True if `other` joined the same branch from the same pool
    pub(crate) fn is_join(&self, other: &PooledResource, xid: &TransactionId) -> bool {
        if std::ptr::eq(self, other) || !std::ptr::eq(self.pool.as_ptr(), other.pool.as_ptr()) {
            return false;
        }
        self.state.lock().xid.as_ref() == Some(xid)
    }

    fn link_join(&self, peer: Arc<PooledResource>) {
        trace!(resource = %self, peer = %peer, "join");
        self.state.lock().joined.push(peer);
    }

    /// Issue the recorded end across the join chain
    fn flush_end(
        &self,
        joined: &[Arc<PooledResource>],
        xid: &TransactionId,
        flag: EndFlag,
    ) -> XaResult<()> {
        let chain = std::iter::once(self).chain(joined.iter().map(|p| p.as_ref()));
        for member in chain {
            if let Some(xa) = &member.xa {
                trace!(xid = %xid, resource = %member, flag = ?flag, "end");
                xa.end(xid, flag)?;
            }
        }
        Ok(())
    }

    /// Commit (`Some(one_phase)`) or roll back (`None`) under the state lock
    fn complete_locked(
        &self,
        state: &mut ResourceState,
        xid: &TransactionId,
        commit: Option<bool>,
    ) -> XaResult<()> {
        if let Some(flag) = state.end_flag.take() {
            if state.use_xa {
                if let Err(e) = self.flush_end(&state.joined, xid, flag) {
                    if let Some(xa) = &self.xa {
                        if let Err(rb) = xa.rollback(xid) {
                            trace!(xid = %xid, error = %rb, "rollback after failed end");
                        }
                    }
                    return Err(e);
                }
            }
        }

        if state.use_xa {
            if let Some(xa) = &self.xa {
                return match commit {
                    Some(one_phase) => {
                        trace!(xid = %xid, resource = %self, one_phase, "commit-XA");
                        xa.commit(xid, one_phase)
                    }
                    None => {
                        trace!(xid = %xid, resource = %self, "rollback-XA");
                        xa.rollback(xid)
                    }
                };
            }
        }

        if let Some(local) = &self.local {
            state.in_local = false;
            let result = match commit {
                Some(_) => {
                    trace!(xid = %xid, resource = %self, "commit-local");
                    local.commit()
                }
                None => {
                    trace!(xid = %xid, resource = %self, "rollback-local");
                    local.rollback()
                }
            };
            return result.map_err(Into::into);
        }

        trace!(resource = %self, "completion for resource without transaction support");
        Ok(())
    }

    fn complete(&self, xid: &TransactionId, commit: Option<bool>) -> XaResult<()> {
        let result = {
            let mut state = self.state.lock();
            if state.xid.as_ref() != Some(xid) {
                trace!(xid = %xid, resource = %self, "completion for a branch no longer held");
                return Ok(());
            }
            let result = self.complete_locked(&mut state, xid, commit);
            state.use_xa = self.xa.is_some();
            result
        };
        if let Err(e) = &result {
            debug!(xid = %xid, resource = %self, error = %e, "completion failed");
        }
        self.clear_transaction_association();
        result
    }

    /// Detach from the finished transaction and settle every handle
    ///
    /// One handle that privately owns this connection (or, failing that,
    /// one that owns none) keeps it; every other handle re-resolves to a
    /// connection of its own. Joined peers are cleared too. Without a
    /// keeper the connection idles, or is destroyed if it errored.
    pub(crate) fn clear_transaction_association(&self) {
        let Some(me) = self.me() else {
            return;
        };
        let (handles, joined) = {
            let mut state = self.state.lock();
            state.xid = None;
            state.end_flag = None;
            (
                std::mem::take(&mut state.handles),
                std::mem::take(&mut state.joined),
            )
        };

        for handle in &handles {
            handle.unbind(self);
        }

        let mut kept = handles.iter().any(|h| h.owns(self));
        for handle in &handles {
            if !kept && handle.owner().is_none() {
                handle.set_own(Some(Arc::clone(&me)));
                kept = true;
            }
            if let Err(e) = handle.reassociate() {
                warn!(resource = %self, handle = handle.id(), error = %e, "failed to re-resolve handle");
            }
        }

        for peer in joined {
            peer.clear_transaction_association();
        }

        if kept {
            return;
        }
        if self.has_error() {
            self.destroy();
        } else {
            self.to_idle();
        }
    }

    // ========================================================================
    // Idle / destroy
    // ========================================================================

    /// Return to the pool if nothing uses the connection any more
    pub(crate) fn to_idle(&self) {
        let scope = {
            let mut state = self.state.lock();
            if !state.handles.is_empty() || state.xid.is_some() || state.in_local {
                return;
            }
            if state.has_error {
                drop(state);
                self.destroy();
                return;
            }
            if state.connection.is_none() {
                return;
            }
            state.event_at = Instant::now();
            state.signal = None;
            state.scope.take()
        };

        if let Some(scope) = scope.and_then(|s| s.upgrade()) {
            scope.forget_resource(self);
        }
        debug!(resource = %self, "idle");
        if let (Some(pool), Some(me)) = (self.pool(), self.me()) {
            pool.return_idle(me);
        }
    }

    /// Close the physical connection and invalidate its handles
    ///
    /// A transaction still associated with the connection is signalled to
    /// roll back.
    pub(crate) fn destroy(&self) {
        let (connection, handles, scope, signal, in_transaction) = {
            let mut state = self.state.lock();
            let Some(connection) = state.connection.take() else {
                return;
            };
            (
                connection,
                std::mem::take(&mut state.handles),
                state.scope.take(),
                state.signal.take(),
                state.xid.is_some(),
            )
        };

        if let Some(pool) = self.pool() {
            pool.forget(self);
        }
        debug!(resource = %self, "destroy");

        for handle in handles {
            handle.invalidate(self);
        }
        if in_transaction {
            if let Some(signal) = signal {
                signal.raise(format!("connection {} destroyed during the transaction", self));
            }
        }
        if let Some(scope) = scope.and_then(|s| s.upgrade()) {
            scope.forget_resource(self);
        }
        if let Err(e) = connection.destroy() {
            debug!(resource = %self, error = %e, "driver destroy failed");
        }
    }

    /// Validity sweep; marks the connection errored when a lifetime bound
    /// is exceeded
    pub(crate) fn check_valid(&self, config: &PoolConfig) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let active = !state.handles.is_empty() || state.xid.is_some();

        let dead = if active {
            let dead = expired(state.event_at, config.max_active_time_bound(), now);
            if dead {
                warn!(resource = %self, "closing connection from active timeout");
            }
            dead
        } else if state.has_error {
            debug!(resource = %self, "closing connection from connection error");
            true
        } else if expired(state.event_at, config.max_idle_time_bound(), now) {
            debug!(resource = %self, "closing connection from idle timeout");
            true
        } else if expired(self.created_at, config.max_pool_time_bound(), now) {
            debug!(resource = %self, "closing connection from pool timeout");
            true
        } else {
            false
        };

        if dead {
            state.has_error = true;
        }
        !dead
    }
}

// ============================================================================
// Participant
// ============================================================================

impl XaResource for PooledResource {
    fn resource_manager_id(&self) -> Option<&str> {
        self.xa.as_deref().and_then(|xa| xa.resource_manager_id())
    }

    fn is_same_rm(&self, other: &dyn XaResource) -> XaResult<bool> {
        // a branch running as a local transaction cannot be joined
        if !self.state.lock().use_xa {
            return Ok(false);
        }
        Ok(matches!(
            (self.resource_manager_id(), other.resource_manager_id()),
            (Some(a), Some(b)) if a == b
        ))
    }

    fn start(&self, xid: &TransactionId, flag: StartFlag) -> XaResult<()> {
        let scope = {
            let state = self.state.lock();
            if state.xid.is_some() {
                trace!(resource = %self, "rejoin");
                return Ok(());
            }
            state.scope.clone()
        };

        let head = match flag {
            StartFlag::Join => scope
                .and_then(|s| s.upgrade())
                .and_then(|s| s.find_join(self, xid)),
            _ => None,
        };

        {
            let mut state = self.state.lock();
            if !state.use_xa && flag != StartFlag::Join {
                if let Some(local) = &self.local {
                    trace!(xid = %xid, resource = %self, "begin-local");
                    local.begin()?;
                    state.in_local = true;
                    state.xid = Some(xid.clone());
                    return Ok(());
                }
            }

            match &self.xa {
                Some(xa) => {
                    trace!(xid = %xid, resource = %self, "start-XA");
                    xa.start(xid, flag)?;
                    state.use_xa = true;
                }
                None => trace!(xid = %xid, resource = %self, "start with non-XA resource"),
            }
            state.xid = Some(xid.clone());
        }

        if let (Some(head), Some(me)) = (head, self.me()) {
            head.link_join(me);
        }
        Ok(())
    }

    fn end(&self, _xid: &TransactionId, flag: EndFlag) -> XaResult<()> {
        self.state.lock().end_flag = Some(flag);
        Ok(())
    }

    fn prepare(&self, xid: &TransactionId) -> XaResult<Vote> {
        let vote = {
            let mut state = self.state.lock();
            if let Some(flag) = state.end_flag.take() {
                if state.use_xa {
                    self.flush_end(&state.joined, xid, flag)?;
                }
            }
            match (&self.xa, state.use_xa) {
                (Some(xa), true) => {
                    trace!(xid = %xid, resource = %self, "prepare-XA");
                    xa.prepare(xid).map_err(|e| {
                        trace!(xid = %xid, resource = %self, error = %e, "prepare failed");
                        e
                    })?
                }
                _ => return Ok(Vote::Ok),
            }
        };

        if vote == Vote::ReadOnly {
            self.clear_transaction_association();
        }
        Ok(vote)
    }

    fn commit(&self, xid: &TransactionId, one_phase: bool) -> XaResult<()> {
        self.complete(xid, Some(one_phase))
    }

    fn rollback(&self, xid: &TransactionId) -> XaResult<()> {
        self.complete(xid, None)
    }

    fn forget(&self, xid: &TransactionId) -> XaResult<()> {
        let use_xa = {
            let state = self.state.lock();
            if state.xid.as_ref() != Some(xid) {
                trace!(xid = %xid, resource = %self, "forget for a branch no longer held");
                return Ok(());
            }
            state.use_xa
        };
        let result = match (&self.xa, use_xa) {
            (Some(xa), true) => xa.forget(xid),
            _ => Ok(()),
        };
        self.clear_transaction_association();
        result
    }

    fn transaction_timeout(&self) -> XaResult<u32> {
        Ok(self.state.lock().transaction_timeout)
    }

    fn set_transaction_timeout(&self, seconds: u32) -> XaResult<bool> {
        {
            let mut state = self.state.lock();
            if state.transaction_timeout == seconds {
                return Ok(true);
            }
            state.transaction_timeout = seconds;
        }
        match &self.xa {
            None => Ok(true),
            Some(xa) if seconds == 0 => xa.set_transaction_timeout(self.default_timeout),
            Some(xa) => xa.set_transaction_timeout(seconds),
        }
    }

    fn recover(&self, flag: RecoverFlag) -> XaResult<Vec<TransactionId>> {
        match (&self.xa, self.state.lock().use_xa) {
            (Some(xa), true) => xa.recover(flag),
            _ => Ok(Vec::new()),
        }
    }
}

impl PartialEq for PooledResource {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl std::fmt::Display for PooledResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PooledResource[{},{}]", self.pool_name, self.id)
    }
}

impl std::fmt::Debug for PooledResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledResource")
            .field("pool", &self.pool_name)
            .field("id", &self.id)
            .field("xa", &self.xa.is_some())
            .field("local", &self.local.is_some())
            .finish()
    }
}
