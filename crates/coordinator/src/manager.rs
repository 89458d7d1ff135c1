//! Transaction manager
//!
//! Process-wide factory for transaction ids and coordinators, holder of
//! the optional commit-decision log, and driver of in-doubt recovery.
//!
//! ## Id Allocation
//!
//! ```text
//! TransactionId::new(server_id, salt, sequence)
//!                        |        |       |
//!                        |        |       +-- AtomicU64, +1 per begin()
//!                        |        +---------- random per manager instance
//!                        +------------------- TransactionConfig::server_id
//! ```
//!
//! The salt keeps ids unique across restarts of the same server.
//!
//! ## Recovery
//!
//! A resource manager may hold prepared branches of transactions that were
//! interrupted by a crash. For every such branch minted by this server:
//! - commit it if the log recorded a commit decision without a finish
//! - roll it back otherwise (presumed abort)
//!
//! Branches of foreign servers are left alone.

use crate::config::TransactionConfig;
use crate::coordinator::TransactionCoordinator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use xapool_core::{Error, RecoverFlag, Result, TransactionId, XaError, XaLog, XaResource};

/// Creates transaction ids and coordinators
///
/// # Thread Safety
///
/// All methods take `&self`; id allocation is a single atomic increment.
/// Share one manager per process behind an `Arc`.
pub struct TransactionManager {
    server_id: u64,
    salt: u64,

    /// Last sequence handed out
    sequence: AtomicU64,

    default_timeout: Option<Duration>,
    log: Option<Arc<dyn XaLog>>,
}

/// Result of recovering one resource manager
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Prepared branches reported by the resource manager
    pub scanned: usize,
    /// Branches committed because the log holds their commit decision
    pub committed: Vec<TransactionId>,
    /// Branches rolled back
    pub rolled_back: Vec<TransactionId>,
    /// Branches of other servers, left untouched
    pub skipped: usize,
    /// Branches whose completion failed
    pub failed: Vec<(TransactionId, XaError)>,
}

impl RecoveryReport {
    /// True if every local branch was completed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl TransactionManager {
    /// Create a manager without a commit-decision log
    pub fn new(config: &TransactionConfig) -> Self {
        TransactionManager {
            server_id: config.server_id,
            salt: rand::random::<u64>(),
            sequence: AtomicU64::new(0),
            default_timeout: config.timeout(),
            log: None,
        }
    }

    /// Record commit decisions in `log`
    pub fn with_log(mut self, log: Arc<dyn XaLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Server id embedded in every transaction id
    pub fn server_id(&self) -> u64 {
        self.server_id
    }

    /// Timeout applied when a coordinator does not set its own
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Commit-decision log, if configured
    pub fn log(&self) -> Option<Arc<dyn XaLog>> {
        self.log.clone()
    }

    /// Mint the root id of a new transaction
    pub fn create_xid(&self) -> TransactionId {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        TransactionId::new(self.server_id, self.salt, sequence)
    }

    /// Create an idle coordinator bound to this manager
    pub fn new_coordinator(self: &Arc<Self>) -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::clone(self))
    }

    /// Complete the prepared branches `resource` reports
    ///
    /// Fails only if the scan itself or reading the log fails; individual
    /// branch failures are collected in the report.
    pub fn recover(&self, resource: &dyn XaResource) -> Result<RecoveryReport> {
        let prepared = resource
            .recover(RecoverFlag::FullScan)
            .map_err(|e| Error::system("recovery scan failed", Some(e)))?;
        let in_doubt = match &self.log {
            Some(log) => log.in_doubt()?,
            None => Vec::new(),
        };

        let mut report = RecoveryReport {
            scanned: prepared.len(),
            ..Default::default()
        };

        for xid in prepared {
            if !xid.is_local_format(self.server_id) {
                debug!(xid = %xid, "recovery skipping foreign branch");
                report.skipped += 1;
                continue;
            }

            let decided = in_doubt.iter().any(|d| d.same_transaction(&xid));
            let result = if decided {
                resource.commit(&xid, false)
            } else {
                resource.rollback(&xid)
            };

            match result {
                Ok(()) if decided => {
                    info!(xid = %xid, "recovery committed in-doubt branch");
                    report.committed.push(xid);
                }
                Ok(()) => {
                    info!(xid = %xid, "recovery rolled back prepared branch");
                    report.rolled_back.push(xid);
                }
                Err(e) => {
                    warn!(xid = %xid, error = %e, "recovery failed to complete branch");
                    report.failed.push((xid, e));
                }
            }
        }

        Ok(report)
    }

    /// Write finish records for every in-doubt transaction
    ///
    /// Call once every resource manager has been recovered; returns the
    /// number of transactions closed.
    pub fn complete_recovery(&self) -> Result<usize> {
        let Some(log) = &self.log else {
            return Ok(0);
        };
        let in_doubt = log.in_doubt()?;
        for xid in &in_doubt {
            log.write_finish(xid)?;
        }
        if !in_doubt.is_empty() {
            info!(count = in_doubt.len(), "closed in-doubt transactions");
        }
        Ok(in_doubt.len())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("server_id", &self.server_id)
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .field("default_timeout", &self.default_timeout)
            .field("has_log", &self.log.is_some())
            .finish()
    }
}
