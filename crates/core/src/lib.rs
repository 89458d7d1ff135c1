//! Core types for xapool
//!
//! This crate defines the vocabulary shared by the coordinator and the pool:
//! - TransactionId: global id plus branch qualifier
//! - XA flags, votes and error codes
//! - TransactionStatus: coordinator state machine
//! - Error types: XaError, ResourceError and the caller-facing Error
//! - Traits: XaResource, LocalTransaction, Synchronization, XaLog and the
//!   managed-connection contracts

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod flags;
pub mod status;
pub mod traits;
pub mod xid;

pub use error::{Error, ResourceError, Result, XaError, XaResult};
pub use flags::{EndFlag, RecoverFlag, StartFlag, Vote, XaErrorCode};
pub use status::TransactionStatus;
pub use traits::{
    BeginCallback, BoxError, CloseCallback, ConnectionRequest, Credential, LocalTransaction,
    ManagedConnection, ManagedConnectionFactory, Synchronization, UserConnection, XaLog,
    XaResource,
};
pub use xid::{TransactionId, GLOBAL_ID_LEN, ROOT_BRANCH, XID_FORMAT_ID, XID_MAGIC};
