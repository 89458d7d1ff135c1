//! XA flags, votes and error codes
//!
//! The numeric values follow the X/Open XA specification so that adapters
//! over real drivers can pass them through unchanged.

use serde::{Deserialize, Serialize};

// ============================================================================
// Association flags
// ============================================================================

/// Flag passed to [`XaResource::start`](crate::XaResource::start)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StartFlag {
    /// Start a new branch
    NoFlags,
    /// Join a branch already started on the same resource manager
    Join,
    /// Resume a suspended association
    Resume,
}

impl StartFlag {
    /// XA numeric value
    pub fn code(self) -> i32 {
        match self {
            StartFlag::NoFlags => 0x0000_0000,
            StartFlag::Join => 0x0020_0000,
            StartFlag::Resume => 0x0800_0000,
        }
    }
}

/// Flag passed to [`XaResource::end`](crate::XaResource::end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndFlag {
    /// Work completed successfully
    Success,
    /// Work failed, the branch will be rolled back
    Fail,
    /// Association suspended, may be resumed later
    Suspend,
}

impl EndFlag {
    /// XA numeric value
    pub fn code(self) -> i32 {
        match self {
            EndFlag::Success => 0x0400_0000,
            EndFlag::Fail => 0x2000_0000,
            EndFlag::Suspend => 0x0200_0000,
        }
    }
}

/// Scan flag passed to [`XaResource::recover`](crate::XaResource::recover)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoverFlag {
    /// Start a recovery scan
    StartScan,
    /// End a recovery scan
    EndScan,
    /// Start and end in one call
    FullScan,
    /// Continue an open scan
    NoFlags,
}

/// Result of a prepare call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vote {
    /// Prepared, a commit or rollback call must follow
    Ok,
    /// Read-only, no further call will follow for this branch
    ReadOnly,
}

// ============================================================================
// Error codes
// ============================================================================

/// XA error code reported by a resource manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum XaErrorCode {
    /// Rolled back for an unspecified reason
    RbRollback,
    /// Rolled back because of a communication failure
    RbCommFail,
    /// Rolled back because of a deadlock
    RbDeadlock,
    /// Rolled back because of an integrity check failure
    RbIntegrity,
    /// Rolled back for a reason not listed
    RbOther,
    /// Rolled back because of a protocol error
    RbProto,
    /// Rolled back because of a timeout
    RbTimeout,
    /// Rolled back because of a transient error
    RbTransient,
    /// Resumption must occur where the suspension occurred
    NoMigrate,
    /// Branch may have been heuristically completed
    HeurHazard,
    /// Branch has been heuristically committed
    HeurCommit,
    /// Branch has been heuristically rolled back
    HeurRollback,
    /// Branch has been heuristically committed and rolled back
    HeurMixed,
    /// Branch was read-only and has been committed
    ReadOnly,
    /// Resource manager error
    RmError,
    /// Unknown transaction id
    NotA,
    /// Invalid arguments
    Invalid,
    /// Method called in an invalid context
    Protocol,
    /// Resource manager unavailable
    RmFail,
    /// Duplicate transaction id
    DuplicateId,
    /// Resource manager called outside of a transaction
    Outside,
}

impl XaErrorCode {
    /// XA numeric value
    pub fn code(self) -> i32 {
        match self {
            XaErrorCode::RbRollback => 100,
            XaErrorCode::RbCommFail => 101,
            XaErrorCode::RbDeadlock => 102,
            XaErrorCode::RbIntegrity => 103,
            XaErrorCode::RbOther => 104,
            XaErrorCode::RbProto => 105,
            XaErrorCode::RbTimeout => 106,
            XaErrorCode::RbTransient => 107,
            XaErrorCode::NoMigrate => 9,
            XaErrorCode::HeurHazard => 8,
            XaErrorCode::HeurCommit => 7,
            XaErrorCode::HeurRollback => 6,
            XaErrorCode::HeurMixed => 5,
            XaErrorCode::ReadOnly => 3,
            XaErrorCode::RmError => -3,
            XaErrorCode::NotA => -4,
            XaErrorCode::Invalid => -5,
            XaErrorCode::Protocol => -6,
            XaErrorCode::RmFail => -7,
            XaErrorCode::DuplicateId => -8,
            XaErrorCode::Outside => -9,
        }
    }

    /// Canonical XA name, e.g. `XA_HEURRB`
    pub fn name(self) -> &'static str {
        match self {
            XaErrorCode::RbRollback => "XA_RBROLLBACK",
            XaErrorCode::RbCommFail => "XA_RBCOMMFAIL",
            XaErrorCode::RbDeadlock => "XA_RBDEADLOCK",
            XaErrorCode::RbIntegrity => "XA_RBINTEGRITY",
            XaErrorCode::RbOther => "XA_RBOTHER",
            XaErrorCode::RbProto => "XA_RBPROTO",
            XaErrorCode::RbTimeout => "XA_RBTIMEOUT",
            XaErrorCode::RbTransient => "XA_RBTRANSIENT",
            XaErrorCode::NoMigrate => "XA_NOMIGRATE",
            XaErrorCode::HeurHazard => "XA_HEURHAZ",
            XaErrorCode::HeurCommit => "XA_HEURCOM",
            XaErrorCode::HeurRollback => "XA_HEURRB",
            XaErrorCode::HeurMixed => "XA_HEURMIX",
            XaErrorCode::ReadOnly => "XA_RDONLY",
            XaErrorCode::RmError => "XAER_RMERR",
            XaErrorCode::NotA => "XAER_NOTA",
            XaErrorCode::Invalid => "XAER_INVAL",
            XaErrorCode::Protocol => "XAER_PROTO",
            XaErrorCode::RmFail => "XAER_RMFAIL",
            XaErrorCode::DuplicateId => "XAER_DUPID",
            XaErrorCode::Outside => "XAER_OUTSIDE",
        }
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            XaErrorCode::RbRollback | XaErrorCode::RbOther => {
                "resource rolled back for an unspecified reason"
            }
            XaErrorCode::RbCommFail => "resource rolled back because of a communication failure",
            XaErrorCode::RbDeadlock => "resource rolled back because of a deadlock",
            XaErrorCode::RbIntegrity => {
                "resource rolled back because of an integrity check failure"
            }
            XaErrorCode::RbProto => {
                "resource rolled back because of a protocol error in the resource manager"
            }
            XaErrorCode::RbTimeout => "resource rolled back because of a timeout",
            XaErrorCode::RbTransient => "resource rolled back because of a transient error",
            XaErrorCode::NoMigrate => "resumption must occur where the suspension occurred",
            XaErrorCode::HeurHazard => "resource may have been heuristically completed",
            XaErrorCode::HeurCommit => "resource has been heuristically committed",
            XaErrorCode::HeurRollback => "resource has been heuristically rolled back",
            XaErrorCode::HeurMixed => "resource has been heuristically committed and rolled back",
            XaErrorCode::ReadOnly => "resource was read-only and has been heuristically committed",
            XaErrorCode::RmError => "resource manager error",
            XaErrorCode::NotA => "the transaction id was invalid",
            XaErrorCode::Invalid => "invalid arguments were given",
            XaErrorCode::Protocol => "method called in an invalid context",
            XaErrorCode::RmFail => "resource manager is unavailable",
            XaErrorCode::DuplicateId => "duplicate transaction id",
            XaErrorCode::Outside => "resource manager called outside of a transaction",
        }
    }

    /// True for the `XA_RB*` family: the branch has already been rolled back
    pub fn is_rollback(self) -> bool {
        matches!(
            self,
            XaErrorCode::RbRollback
                | XaErrorCode::RbCommFail
                | XaErrorCode::RbDeadlock
                | XaErrorCode::RbIntegrity
                | XaErrorCode::RbOther
                | XaErrorCode::RbProto
                | XaErrorCode::RbTimeout
                | XaErrorCode::RbTransient
        )
    }

    /// True for the heuristic completion codes
    pub fn is_heuristic(self) -> bool {
        matches!(
            self,
            XaErrorCode::HeurHazard
                | XaErrorCode::HeurCommit
                | XaErrorCode::HeurRollback
                | XaErrorCode::HeurMixed
        )
    }
}

impl std::fmt::Display for XaErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
