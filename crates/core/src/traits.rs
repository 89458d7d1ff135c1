//! Collaborator contracts
//!
//! Everything the coordinator and the pool call out to is expressed as a
//! trait here, so drivers and test doubles only depend on this crate:
//!
//! - [`XaResource`]: a resource manager taking part in two-phase commit
//! - [`LocalTransaction`]: the single-resource fast path of a driver
//! - [`Synchronization`]: completion callbacks registered on a transaction
//! - [`XaLog`]: optional durable record of commit decisions
//! - [`ManagedConnectionFactory`] / [`ManagedConnection`]: the physical
//!   connection opener used by the pool
//! - [`BeginCallback`] / [`CloseCallback`]: scope-level registries
//!
//! All traits are object safe and `Send + Sync`; participants are held as
//! `Arc<dyn Trait>`.

use crate::error::{ResourceError, Result, XaResult};
use crate::flags::{EndFlag, RecoverFlag, StartFlag, Vote};
use crate::status::TransactionStatus;
use crate::xid::TransactionId;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Boxed error returned by application callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Application-level connection handed out by a [`ManagedConnection`]
///
/// The pool never looks inside; it only keeps the `Arc` stable across
/// handle rebinding.
pub type UserConnection = Arc<dyn Any + Send + Sync>;

// ============================================================================
// Resource manager participation
// ============================================================================

/// Resource manager participating in two-phase commit
///
/// Implementations are adapters over real drivers. Two resources belong to
/// the same resource manager when [`is_same_rm`](XaResource::is_same_rm)
/// returns true; the default compares
/// [`resource_manager_id`](XaResource::resource_manager_id) values.
pub trait XaResource: Send + Sync {
    /// Identity of the resource manager behind this resource, if known
    fn resource_manager_id(&self) -> Option<&str> {
        None
    }

    /// True if `other` is served by the same resource manager
    fn is_same_rm(&self, other: &dyn XaResource) -> XaResult<bool> {
        Ok(matches!(
            (self.resource_manager_id(), other.resource_manager_id()),
            (Some(a), Some(b)) if a == b
        ))
    }

    /// Associate the branch `xid` with this resource
    fn start(&self, xid: &TransactionId, flag: StartFlag) -> XaResult<()>;

    /// End the association with `xid`
    fn end(&self, xid: &TransactionId, flag: EndFlag) -> XaResult<()>;

    /// Ask the resource manager to vote on `xid`
    fn prepare(&self, xid: &TransactionId) -> XaResult<Vote>;

    /// Commit `xid`, skipping the prepare round when `one_phase` is set
    fn commit(&self, xid: &TransactionId, one_phase: bool) -> XaResult<()>;

    /// Roll back `xid`
    fn rollback(&self, xid: &TransactionId) -> XaResult<()>;

    /// Forget a heuristically completed branch
    fn forget(&self, _xid: &TransactionId) -> XaResult<()> {
        Ok(())
    }

    /// Current transaction timeout in seconds, 0 for the resource default
    fn transaction_timeout(&self) -> XaResult<u32> {
        Ok(0)
    }

    /// Set the transaction timeout; returns false if unsupported
    fn set_transaction_timeout(&self, _seconds: u32) -> XaResult<bool> {
        Ok(false)
    }

    /// List branches the resource manager holds in the prepared state
    fn recover(&self, _flag: RecoverFlag) -> XaResult<Vec<TransactionId>> {
        Ok(Vec::new())
    }
}

/// Driver-level local transaction
///
/// Used instead of a distributed branch when exactly one resource takes
/// part in the transaction.
pub trait LocalTransaction: Send + Sync {
    /// Begin a local transaction
    fn begin(&self) -> std::result::Result<(), ResourceError>;

    /// Commit the local transaction
    fn commit(&self) -> std::result::Result<(), ResourceError>;

    /// Roll back the local transaction
    fn rollback(&self) -> std::result::Result<(), ResourceError>;
}

/// Completion callbacks registered on a transaction
pub trait Synchronization: Send + Sync {
    /// Called before commit or rollback starts
    ///
    /// An error vetoes a commit: the transaction rolls back instead.
    fn before_completion(&self) -> std::result::Result<(), BoxError>;

    /// Called exactly once after completion with the final status
    fn after_completion(&self, status: TransactionStatus);
}

/// Durable record of commit decisions
///
/// A commit record written without a matching finish record marks the
/// transaction in doubt; recovery commits prepared branches of in-doubt
/// transactions and rolls back everything else.
pub trait XaLog: Send + Sync {
    /// Record the decision to commit `xid`; must be durable on return
    fn write_commit(&self, xid: &TransactionId) -> Result<()>;

    /// Record that every participant of `xid` has completed
    fn write_finish(&self, xid: &TransactionId) -> Result<()>;

    /// Transactions with a commit record and no finish record
    fn in_doubt(&self) -> Result<Vec<TransactionId>>;
}

// ============================================================================
// Physical connections
// ============================================================================

/// Principal a connection is opened for
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Credential {
    principal: Option<String>,
}

impl Credential {
    /// Credential for a named principal
    pub fn new(principal: impl Into<String>) -> Self {
        Credential {
            principal: Some(principal.into()),
        }
    }

    /// Credential carrying no principal
    pub fn anonymous() -> Self {
        Credential::default()
    }

    /// Principal name, if any
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }
}

/// Connection-request parameters
///
/// Two requests are compatible only when all parameters are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConnectionRequest {
    properties: BTreeMap<String, String>,
}

impl ConnectionRequest {
    /// Empty request
    pub fn new() -> Self {
        ConnectionRequest::default()
    }

    /// Add a parameter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a parameter
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Physical connection to a resource manager
pub trait ManagedConnection: Send + Sync {
    /// Distributed-transaction interface, if the driver supports XA
    fn xa_resource(&self) -> Option<Arc<dyn XaResource>>;

    /// Local-transaction interface, if the driver supports it
    fn local_transaction(&self) -> Option<Arc<dyn LocalTransaction>>;

    /// Obtain a new application-level connection
    fn connection(
        &self,
        credential: &Credential,
        request: &ConnectionRequest,
    ) -> std::result::Result<UserConnection, ResourceError>;

    /// Re-point an existing application-level connection at this physical
    /// connection
    fn associate_connection(
        &self,
        connection: &UserConnection,
    ) -> std::result::Result<(), ResourceError>;

    /// Reset application-visible state before the connection goes idle
    fn cleanup(&self) -> std::result::Result<(), ResourceError>;

    /// Close the physical connection
    fn destroy(&self) -> std::result::Result<(), ResourceError>;
}

/// Opener of physical connections
pub trait ManagedConnectionFactory: Send + Sync {
    /// Open a new physical connection
    fn create_managed_connection(
        &self,
        credential: &Credential,
        request: &ConnectionRequest,
    ) -> std::result::Result<Arc<dyn ManagedConnection>, ResourceError>;

    /// Driver veto on reusing an idle connection for a request
    ///
    /// The pool has already checked credential and request equality.
    fn matches(
        &self,
        _connection: &dyn ManagedConnection,
        _credential: &Credential,
        _request: &ConnectionRequest,
    ) -> bool {
        true
    }
}

// ============================================================================
// Scope callbacks
// ============================================================================

/// Resource notified when a scope begins a transaction
pub trait BeginCallback: Send + Sync {
    /// Called after the coordinator has begun `xid`
    fn begin(&self, xid: &TransactionId) -> std::result::Result<(), ResourceError>;
}

/// Resource closed when a scope is aborted
pub trait CloseCallback: Send + Sync {
    /// Release the resource
    fn close(&self);
}
