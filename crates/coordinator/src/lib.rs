//! Transaction coordination for xapool
//!
//! This crate implements the two-phase-commit protocol with:
//! - TransactionManager: id allocation, commit-decision log, recovery
//! - TransactionCoordinator: per-thread enlistment and completion
//! - Lazy timeouts and cross-thread rollback signals
//! - Heuristic outcome classification

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alarm;
pub mod config;
pub mod coordinator;
pub mod manager;
pub mod outcome;

pub use alarm::{RollbackSignal, TimeoutAlarm};
pub use config::{TransactionConfig, MAX_TIMEOUT_SECS};
pub use coordinator::{BranchFlags, TransactionCoordinator};
pub use manager::{RecoveryReport, TransactionManager};
pub use outcome::{Outcome, RollbackSummary};
