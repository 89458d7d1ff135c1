//! Error types for the transaction core.
//!
//! Three error types cross crate boundaries:
//! - [`XaError`]: a resource-manager failure carrying an XA error code
//! - [`ResourceError`]: a driver failure outside the XA protocol (opening a
//!   connection, local transactions, cleanup)
//! - [`Error`]: the caller-facing taxonomy returned by the coordinator,
//!   the scope and the pool
//!
//! ## Taxonomy
//!
//! | Variant | Meaning | Retry |
//! |---------|---------|-------|
//! | IllegalState | programmer misuse (nested begin, closed scope, double suspend) | never |
//! | Rollback | a vote, callback or rollback-only mark aborted the transaction | caller's choice |
//! | HeuristicRollback / HeuristicMixed / HeuristicCommit | participants disagreed | manual reconciliation |
//! | System | unexpected resource-manager failure | no |
//! | PoolExhausted | no connection became available in time | yes |

use crate::flags::XaErrorCode;
use thiserror::Error;

/// Resource-manager failure
///
/// Displays the driver's message when one was given, otherwise the XA name
/// and description of the code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.render())]
pub struct XaError {
    /// XA error code
    pub code: XaErrorCode,
    /// Optional driver message
    pub message: Option<String>,
}

impl XaError {
    /// Create an error from a bare code
    pub fn new(code: XaErrorCode) -> Self {
        XaError {
            code,
            message: None,
        }
    }

    /// Create an error with a driver message
    pub fn with_message(code: XaErrorCode, message: impl Into<String>) -> Self {
        XaError {
            code,
            message: Some(message.into()),
        }
    }

    fn render(&self) -> String {
        match &self.message {
            Some(msg) if !msg.is_empty() => msg.clone(),
            _ => format!("{}: {}", self.code.name(), self.code.description()),
        }
    }
}

impl From<ResourceError> for XaError {
    fn from(e: ResourceError) -> Self {
        XaError::with_message(XaErrorCode::RmError, e.to_string())
    }
}

/// Driver failure outside the XA protocol
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ResourceError {
    message: String,
}

impl ResourceError {
    /// Create a resource error
    pub fn new(message: impl Into<String>) -> Self {
        ResourceError {
            message: message.into(),
        }
    }

    /// Error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Caller-facing error taxonomy
#[derive(Debug, Error)]
pub enum Error {
    /// Programmer misuse; fatal, never retried
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The transaction was rolled back instead of committed
    #[error("transaction rolled back: {reason}")]
    Rollback {
        /// Why the transaction rolled back
        reason: String,
        /// Last resource-manager code involved, if any
        code: Option<XaErrorCode>,
    },

    /// Every participant rolled back, at least one heuristically
    #[error("heuristic rollback ({participants} participants): {message}")]
    HeuristicRollback {
        /// Diagnostic message
        message: String,
        /// Number of enlisted participants
        participants: usize,
        /// Last resource-manager code
        code: Option<XaErrorCode>,
    },

    /// Some participants committed while others rolled back
    #[error("heuristic mixed outcome ({participants} participants): {message}")]
    HeuristicMixed {
        /// Diagnostic message
        message: String,
        /// Number of enlisted participants
        participants: usize,
        /// Last resource-manager code
        code: Option<XaErrorCode>,
    },

    /// Participants committed although the decision was to roll back
    #[error("heuristic commit ({participants} participants): {message}")]
    HeuristicCommit {
        /// Diagnostic message
        message: String,
        /// Number of enlisted participants
        participants: usize,
        /// Last resource-manager code
        code: Option<XaErrorCode>,
    },

    /// Unexpected resource-manager failure
    #[error("system failure: {message}")]
    System {
        /// Diagnostic message
        message: String,
        /// Underlying resource-manager error
        #[source]
        source: Option<XaError>,
    },

    /// Driver failure while opening or managing a connection
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// No connection became available within the wait time
    #[error("connection pool '{pool}' exhausted: {message}")]
    PoolExhausted {
        /// Pool name
        pool: String,
        /// Diagnostic message
        message: String,
    },

    /// The pool has been closed
    #[error("connection pool '{0}' is closed")]
    PoolClosed(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Transaction log failure
    #[error("transaction log error: {0}")]
    Log(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for resource-manager operations
pub type XaResult<T> = std::result::Result<T, XaError>;

impl Error {
    /// Create an illegal-state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Error::IllegalState(message.into())
    }

    /// Create a rollback error without a resource-manager code
    pub fn rollback(reason: impl Into<String>) -> Self {
        Error::Rollback {
            reason: reason.into(),
            code: None,
        }
    }

    /// Create a system error wrapping a resource-manager failure
    pub fn system(message: impl Into<String>, source: Option<XaError>) -> Self {
        Error::System {
            message: message.into(),
            source,
        }
    }

    /// Last resource-manager code carried by this error
    pub fn xa_code(&self) -> Option<XaErrorCode> {
        match self {
            Error::Rollback { code, .. }
            | Error::HeuristicRollback { code, .. }
            | Error::HeuristicMixed { code, .. }
            | Error::HeuristicCommit { code, .. } => *code,
            Error::System { source, .. } => source.as_ref().map(|e| e.code),
            _ => None,
        }
    }

    /// Check if this is a programmer-misuse error.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::IllegalState(_))
    }

    /// Check if the transaction was rolled back consistently.
    pub fn is_rollback(&self) -> bool {
        matches!(self, Error::Rollback { .. })
    }

    /// Check if participants may disagree on the outcome.
    ///
    /// Heuristic outcomes may need manual reconciliation.
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            Error::HeuristicRollback { .. }
                | Error::HeuristicMixed { .. }
                | Error::HeuristicCommit { .. }
        )
    }

    /// Check if this is a system failure.
    pub fn is_system(&self) -> bool {
        matches!(self, Error::System { .. })
    }

    /// Check if this error is retryable.
    ///
    /// Only pool exhaustion may succeed on retry; transaction outcomes are
    /// final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PoolExhausted { .. })
    }
}
