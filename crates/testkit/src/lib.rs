//! Test support for xapool
//!
//! Scripted collaborators implementing the `xapool-core` traits:
//! - MockXaResource: records calls, scripted votes and failures
//! - MockFactory / MockConnection: physical connections for pool tests
//! - MockLocalTransaction: counts local begin/commit/rollback
//! - RecordingSynchronization: observes completion callbacks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod xa;

pub use connection::{
    user_connection, MockConnection, MockFactory, MockLocalTransaction, MockUserConnection,
};
pub use xa::{MockXaResource, XaCall};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use xapool_core::{BoxError, Synchronization, TransactionStatus};

/// Install a test-friendly tracing subscriber once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::TRACE)
        .try_init();
}

/// Synchronization recording every callback
#[derive(Debug, Default)]
pub struct RecordingSynchronization {
    before: AtomicUsize,
    after: Mutex<Vec<TransactionStatus>>,
    veto: Mutex<Option<String>>,
}

impl RecordingSynchronization {
    /// Synchronization that accepts every completion
    pub fn new() -> Self {
        RecordingSynchronization::default()
    }

    /// Synchronization whose `before_completion` fails with `reason`
    pub fn vetoing(reason: impl Into<String>) -> Self {
        RecordingSynchronization {
            veto: Mutex::new(Some(reason.into())),
            ..Default::default()
        }
    }

    /// Number of `before_completion` calls
    pub fn before_count(&self) -> usize {
        self.before.load(Ordering::SeqCst)
    }

    /// Statuses passed to `after_completion`, in call order
    pub fn after_statuses(&self) -> Vec<TransactionStatus> {
        self.after.lock().clone()
    }
}

impl Synchronization for RecordingSynchronization {
    fn before_completion(&self) -> Result<(), BoxError> {
        self.before.fetch_add(1, Ordering::SeqCst);
        match self.veto.lock().as_ref() {
            Some(reason) => Err(reason.clone().into()),
            None => Ok(()),
        }
    }

    fn after_completion(&self, status: TransactionStatus) {
        self.after.lock().push(status);
    }
}
