//! Two-phase-commit coordinator
//!
//! One coordinator drives one transaction at a time for one thread of
//! control. It owns the list of enlisted participants and their branch
//! ids, and runs the completion protocol.
//!
//! ## State Machine
//!
//! ```text
//! NoTransaction --begin--> Active --set_rollback_only/timeout--> MarkedRollbackOnly
//!                            |                                         |
//!                          commit                               commit/rollback
//!                            v                                         v
//!                        Preparing --> Committing --> Committed   RollingBack --> RolledBack
//!                            |              |                                        ^
//!                            +--------------+----------- failure --------------------+
//! ```
//!
//! Both terminal states fall back to `NoTransaction` once the completion
//! callbacks have run.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. before_completion: synchronizations, then end(Success|Fail) on active participants
//! 2. rollback-only?  -> roll back everyone, return the recorded cause
//! 3. prepare from last-enlisted to first; participant 0 is committed one-phase
//!    instead when no log is configured or nobody voted Ok
//! 4. write the commit decision to the log (if any participant voted Ok)
//! 5. commit in enlistment order; after the first failure, roll back the rest
//! 6. after_completion: finish record, synchronizations with the final status
//! ```

use crate::alarm::{RollbackSignal, TimeoutAlarm};
use crate::config::MAX_TIMEOUT_SECS;
use crate::manager::TransactionManager;
use crate::outcome::{Outcome, RollbackSummary};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};
use xapool_core::{
    EndFlag, Error, Result, StartFlag, Synchronization, TransactionId, TransactionStatus, Vote,
    XaErrorCode, XaLog, XaResource,
};

// ============================================================================
// Branch flags
// ============================================================================

/// Per-participant state bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchFlags(u8);

impl BranchFlags {
    /// Associated with the transaction (between start and end)
    pub const ACTIVE: BranchFlags = BranchFlags(0x01);
    /// Joined the branch of an earlier participant on the same resource manager
    pub const SHARED_RM: BranchFlags = BranchFlags(0x02);
    /// Association suspended
    pub const SUSPENDED: BranchFlags = BranchFlags(0x04);
    /// Voted to commit (or designated for one-phase commit)
    pub const COMMIT: BranchFlags = BranchFlags(0x08);
    /// Voted read-only; the branch is finished and gets no completion call
    pub const READ_ONLY: BranchFlags = BranchFlags(0x10);

    /// True if every bit of `other` is set
    pub fn contains(self, other: BranchFlags) -> bool {
        self.0 & other.0 == other.0
    }

    fn insert(&mut self, other: BranchFlags) {
        self.0 |= other.0;
    }

    fn remove(&mut self, other: BranchFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for BranchFlags {
    type Output = BranchFlags;

    fn bitor(self, rhs: BranchFlags) -> BranchFlags {
        BranchFlags(self.0 | rhs.0)
    }
}

struct Enlistment {
    resource: Arc<dyn XaResource>,
    xid: TransactionId,
    flags: BranchFlags,
}

/// Participant identity is object identity
fn same_participant(a: &Arc<dyn XaResource>, b: &Arc<dyn XaResource>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[derive(Debug, Clone)]
struct RollbackCause {
    reason: String,
    code: Option<XaErrorCode>,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Per-thread two-phase-commit coordinator
///
/// Methods take `&mut self`: a coordinator belongs to a single thread of
/// control. The only cross-thread inputs are the [`RollbackSignal`] and the
/// timeout deadline, both folded into the status at the start of each
/// operation.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use xapool_coordinator::{TransactionConfig, TransactionManager};
/// use xapool_core::TransactionStatus;
///
/// let tm = Arc::new(TransactionManager::new(&TransactionConfig::default()));
/// let mut tx = tm.new_coordinator();
///
/// tx.begin().unwrap();
/// assert_eq!(tx.status(), TransactionStatus::Active);
/// tx.commit().unwrap();
/// assert_eq!(tx.status(), TransactionStatus::NoTransaction);
/// ```
pub struct TransactionCoordinator {
    manager: Arc<TransactionManager>,
    xid: Option<TransactionId>,
    status: TransactionStatus,
    enlisted: Vec<Enlistment>,

    suspended: bool,
    /// Closed for good; begin() is rejected
    dead: bool,

    timeout: Option<Duration>,
    alarm: TimeoutAlarm,
    signal: Arc<RollbackSignal>,
    rollback_cause: Option<RollbackCause>,

    synchronizations: Vec<Arc<dyn Synchronization>>,
    interposed: Vec<Arc<dyn Synchronization>>,
    resources: HashMap<String, Arc<dyn Any + Send + Sync>>,

    /// Log holding this transaction's commit decision, if one was written
    decision_log: Option<Arc<dyn XaLog>>,
}

impl TransactionCoordinator {
    /// Create an idle coordinator
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        let timeout = manager.default_timeout();
        TransactionCoordinator {
            manager,
            xid: None,
            status: TransactionStatus::NoTransaction,
            enlisted: Vec::new(),
            suspended: false,
            dead: false,
            timeout,
            alarm: TimeoutAlarm::new(),
            signal: Arc::new(RollbackSignal::new()),
            rollback_cause: None,
            synchronizations: Vec::new(),
            interposed: Vec::new(),
            resources: HashMap::new(),
            decision_log: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Root id of the running transaction
    pub fn xid(&self) -> Option<&TransactionId> {
        self.xid.as_ref()
    }

    /// Current status, including a pending timeout or rollback signal
    pub fn status(&self) -> TransactionStatus {
        if self.status == TransactionStatus::Active
            && (self.signal.is_raised() || self.alarm.has_fired(Instant::now()))
        {
            TransactionStatus::MarkedRollbackOnly
        } else {
            self.status
        }
    }

    /// True while the transaction is active and not marked rollback-only
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// True once marked rollback-only
    pub fn is_rollback_only(&self) -> bool {
        self.status() == TransactionStatus::MarkedRollbackOnly
    }

    /// True while suspended
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// True after [`close`](Self::close)
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Number of enlisted participants, joined ones included
    pub fn enlisted_count(&self) -> usize {
        self.enlisted.len()
    }

    /// Local-transaction optimization is allowed while nothing is enlisted
    pub fn allow_local_transaction_optimization(&self) -> bool {
        self.enlisted.is_empty()
    }

    /// Signal other threads can raise to force a rollback
    pub fn rollback_signal(&self) -> Arc<RollbackSignal> {
        Arc::clone(&self.signal)
    }

    /// Transaction manager this coordinator belongs to
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Effective timeout, `None` when disabled
    pub fn transaction_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Set the timeout in seconds
    ///
    /// `0` restores the manager default, a negative value means the
    /// maximum of one day. Re-arms the alarm while the transaction is
    /// active.
    pub fn set_transaction_timeout(&mut self, seconds: i32) {
        self.timeout = match seconds {
            0 => self.manager.default_timeout(),
            s if s < 0 => Some(Duration::from_secs(MAX_TIMEOUT_SECS)),
            s => Some(Duration::from_secs(s as u64)),
        };

        match self.timeout {
            Some(t) if self.status == TransactionStatus::Active => self.alarm.queue(t),
            _ => self.alarm.dequeue(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start a new transaction
    ///
    /// Nested transactions are not supported: the previous one must be
    /// committed or rolled back first.
    pub fn begin(&mut self) -> Result<()> {
        if self.status != TransactionStatus::NoTransaction {
            return Err(Error::illegal_state(format!(
                "nested transactions are not supported; the previous transaction \
                 did not commit or roll back (status {})",
                self.status
            )));
        }
        if self.dead {
            return Err(Error::illegal_state("coordinator has been closed"));
        }

        self.status = TransactionStatus::Active;
        self.rollback_cause = None;
        self.signal.clear();
        let xid = self.manager.create_xid();
        debug!(xid = %xid, "begin");
        self.xid = Some(xid);

        if let Some(t) = self.timeout {
            self.alarm.queue(t);
        }
        Ok(())
    }

    /// Mark the transaction so that it can only roll back
    pub fn set_rollback_only(&mut self) -> Result<()> {
        self.set_rollback_only_with("transaction marked rollback-only")
    }

    /// Mark the transaction rollback-only, recording `cause`
    ///
    /// Only the first cause is kept.
    pub fn set_rollback_only_with(&mut self, cause: impl Into<String>) -> Result<()> {
        match self.status {
            TransactionStatus::Active | TransactionStatus::MarkedRollbackOnly => {
                self.mark_rollback_only(cause.into(), None);
                self.alarm.dequeue();
                Ok(())
            }
            other => Err(Error::illegal_state(format!(
                "cannot set rollback-only because the transaction is not active (status {})",
                other
            ))),
        }
    }

    /// Register a completion callback
    pub fn register_synchronization(&mut self, sync: Arc<dyn Synchronization>) {
        trace!(xid = ?self.xid, "register synchronization");
        self.synchronizations.push(sync);
    }

    /// Register a container-level completion callback
    ///
    /// Interposed callbacks run after regular ones before completion, and
    /// before them after completion.
    pub fn register_interposed_synchronization(&mut self, sync: Arc<dyn Synchronization>) {
        self.interposed.push(sync);
    }

    /// Attach a value to the running transaction
    pub fn put_resource(&mut self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.resources.insert(key.into(), value);
    }

    /// Value attached with [`put_resource`](Self::put_resource)
    pub fn get_resource(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.resources.get(key).cloned()
    }

    // ========================================================================
    // Enlistment
    // ========================================================================

    /// Add a participant to the transaction
    ///
    /// A participant on the same resource manager as an earlier one joins
    /// that participant's branch; otherwise it gets a fresh branch id. The
    /// coordinator's timeout is pushed to the participant before `start`.
    ///
    /// # Errors
    ///
    /// - `Rollback` if the transaction is marked rollback-only
    /// - `IllegalState` if suspended, not active, or the participant is
    ///   already actively enlisted
    /// - `System` if `start` fails; the transaction is marked rollback-only
    pub fn enlist(&mut self, resource: Arc<dyn XaResource>) -> Result<()> {
        self.sync_signals();

        if self.suspended {
            return Err(Error::illegal_state(
                "cannot enlist a resource because the transaction is suspended",
            ));
        }
        match self.status {
            TransactionStatus::Active => {}
            TransactionStatus::MarkedRollbackOnly => return Err(self.rollback_error()),
            TransactionStatus::NoTransaction => {
                return Err(Error::illegal_state(
                    "cannot enlist a resource because no transaction is active",
                ))
            }
            other => {
                return Err(Error::illegal_state(format!(
                    "cannot enlist a resource in state {}",
                    other
                )))
            }
        }
        let root = match &self.xid {
            Some(xid) => xid.clone(),
            None => return Err(Error::illegal_state("active transaction without an id")),
        };

        let duplicate = self.enlisted.iter().any(|e| {
            e.flags.contains(BranchFlags::ACTIVE) && same_participant(&e.resource, &resource)
        });
        if duplicate {
            let msg = format!("cannot enlist the same resource twice in {}", root);
            self.mark_rollback_only(msg.clone(), None);
            return Err(Error::IllegalState(msg));
        }

        let mut flag = StartFlag::NoFlags;
        let mut branch = root.clone();
        let mut reuse = None;

        for (i, entry) in self.enlisted.iter().enumerate() {
            let joins = same_participant(&entry.resource, &resource)
                || match entry.resource.is_same_rm(resource.as_ref()) {
                    Ok(joins) => joins,
                    Err(e) => {
                        debug!(xid = %root, error = %e, "is_same_rm failed");
                        false
                    }
                };
            if joins {
                flag = StartFlag::Join;
                branch = entry.xid.clone();
                if !entry.flags.contains(BranchFlags::ACTIVE) {
                    reuse = Some(i);
                }
                break;
            }
        }

        if !self.enlisted.is_empty() && flag != StartFlag::Join {
            branch = root.derive(self.enlisted.len() as u32 + 1);
        }

        let started = self.push_timeout(resource.as_ref()).and_then(|_| {
            trace!(xid = %branch, join = flag == StartFlag::Join, "start");
            resource.start(&branch, flag)
        });
        if let Err(e) = started {
            let msg = format!("failed to enlist resource in {}: {}", root, e);
            error!(xid = %root, error = %e, "enlist failed");
            self.mark_rollback_only(msg.clone(), Some(e.code));
            return Err(Error::system(msg, Some(e)));
        }

        match reuse {
            Some(i) => {
                let entry = &mut self.enlisted[i];
                entry.resource = resource;
                entry.flags.insert(BranchFlags::ACTIVE);
            }
            None => {
                let mut flags = BranchFlags::ACTIVE;
                if flag == StartFlag::Join {
                    flags.insert(BranchFlags::SHARED_RM);
                }
                self.enlisted.push(Enlistment {
                    resource,
                    xid: branch,
                    flags,
                });
            }
        }
        Ok(())
    }

    /// End a participant's association
    ///
    /// Returns `false` if the participant is not enlisted. Outside a
    /// transaction the participant is dropped from the list. While marked
    /// rollback-only the end flag is forced to `Fail`.
    pub fn delist(&mut self, resource: &Arc<dyn XaResource>, flag: EndFlag) -> Result<bool> {
        self.sync_signals();

        if self.suspended {
            return Err(Error::illegal_state("transaction is suspended"));
        }
        let Some(index) = self
            .enlisted
            .iter()
            .rposition(|e| same_participant(&e.resource, resource))
        else {
            return Ok(false);
        };

        if self.status == TransactionStatus::NoTransaction {
            self.enlisted.remove(index);
            return Ok(true);
        }

        let flag = if self.status == TransactionStatus::MarkedRollbackOnly {
            EndFlag::Fail
        } else {
            flag
        };

        let entry = &mut self.enlisted[index];
        entry.flags.remove(BranchFlags::ACTIVE);
        if let Err(e) = entry.resource.end(&entry.xid, flag) {
            let msg = format!("failed to delist resource: {}", e);
            error!(xid = %entry.xid, error = %e, "delist failed");
            self.mark_rollback_only(msg.clone(), Some(e.code));
            return Err(Error::system(msg, Some(e)));
        }
        Ok(true)
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// - `IllegalState` outside a transaction
    /// - `Rollback` if marked rollback-only, vetoed by a synchronization, or
    ///   a participant failed to prepare
    /// - `HeuristicRollback` / `HeuristicMixed` / `HeuristicCommit` /
    ///   `System` when the commit phase failed
    ///
    /// Completion callbacks run exactly once whatever the result.
    pub fn commit(&mut self) -> Result<()> {
        self.sync_signals();
        self.alarm.dequeue();

        match self.status {
            TransactionStatus::Active => debug!(xid = ?self.xid, "commit (active)"),
            TransactionStatus::MarkedRollbackOnly => {
                debug!(xid = ?self.xid, "commit (marked rollback)")
            }
            TransactionStatus::NoTransaction => {
                return Err(Error::illegal_state(
                    "cannot commit outside of a transaction; either begin() is missing \
                     or the transaction has already completed",
                ))
            }
            other => {
                self.rollback_participants();
                self.after_completion();
                return Err(Error::illegal_state(format!(
                    "cannot commit because the transaction state is {}",
                    other
                )));
            }
        }

        let outcome = self.run_commit();
        let participants = self.enlisted.len();
        if !outcome.is_committed() {
            debug!(xid = ?self.xid, outcome = ?outcome, "commit failed");
        }
        self.status = outcome.status();
        self.after_completion();
        outcome.into_result(participants)
    }

    fn run_commit(&mut self) -> Outcome {
        if let Err(reason) = self.before_completion() {
            let summary = self.rollback_participants();
            return summary.into_outcome(reason, None);
        }

        if self.status == TransactionStatus::MarkedRollbackOnly {
            let cause = self.rollback_cause.clone();
            let summary = self.rollback_participants();
            let (reason, code) = match cause {
                Some(c) => (
                    format!("transaction can't commit because it has been marked rolled back: {}", c.reason),
                    c.code,
                ),
                None => (
                    "transaction can't commit because it has been marked rolled back".to_string(),
                    None,
                ),
            };
            return summary.into_outcome(reason, code);
        }

        if self.enlisted.is_empty() {
            return Outcome::Committed;
        }

        // Prepare, last enlisted first
        self.status = TransactionStatus::Preparing;
        let log = self.manager.log();
        let mut has_prepare = false;
        let mut one_phase = false;

        for i in (0..self.enlisted.len()).rev() {
            if i == 0 && (log.is_none() || !has_prepare) {
                self.enlisted[0].flags.insert(BranchFlags::COMMIT);
                one_phase = true;
                break;
            }

            let entry = &mut self.enlisted[i];
            if entry.flags.contains(BranchFlags::SHARED_RM) {
                continue;
            }
            match entry.resource.prepare(&entry.xid) {
                Ok(Vote::ReadOnly) => {
                    trace!(xid = %entry.xid, "prepare: read-only");
                    entry.flags.insert(BranchFlags::READ_ONLY);
                }
                Ok(Vote::Ok) => {
                    trace!(xid = %entry.xid, "prepare: ok");
                    has_prepare = true;
                    entry.flags.insert(BranchFlags::COMMIT);
                }
                Err(e) => {
                    warn!(xid = %entry.xid, error = %e, "prepare failed, rolling back");
                    let code = e.code;
                    let reason = format!("all commits rolled back: {}", e);
                    let summary = self.rollback_participants();
                    return summary.into_outcome(reason, Some(code));
                }
            }
        }

        if has_prepare {
            if let (Some(log), Some(xid)) = (log, self.xid.clone()) {
                if let Err(e) = log.write_commit(&xid) {
                    error!(xid = %xid, error = %e, "failed to log commit decision");
                    self.rollback_participants();
                    return Outcome::SystemFailure {
                        message: format!("failed to log commit decision for {}: {}", xid, e),
                        source: None,
                    };
                }
                self.decision_log = Some(log);
            }
        }

        // Commit, first enlisted first
        self.status = TransactionStatus::Committing;
        let mut outcome = Outcome::Committed;
        let mut committed_any = false;

        if one_phase {
            let entry = &self.enlisted[0];
            match entry.resource.commit(&entry.xid, true) {
                Ok(()) => committed_any = true,
                Err(e) => {
                    debug!(xid = %entry.xid, error = %e, "one-phase commit failed");
                    outcome = outcome.classify(&e, committed_any);
                    committed_any |= outcome.is_committed();
                }
            }
            self.reset_timeout(entry.resource.as_ref());
        }

        for (i, entry) in self.enlisted.iter().enumerate() {
            if i == 0 && one_phase {
                continue;
            }
            if entry.flags.contains(BranchFlags::SHARED_RM)
                || entry.flags.contains(BranchFlags::READ_ONLY)
                || !entry.flags.contains(BranchFlags::COMMIT)
            {
                continue;
            }

            if outcome.is_committed() {
                match entry.resource.commit(&entry.xid, false) {
                    Ok(()) => committed_any = true,
                    Err(e) => {
                        debug!(xid = %entry.xid, error = %e, "commit failed");
                        outcome = outcome.classify(&e, committed_any);
                        committed_any |= outcome.is_committed();
                    }
                }
            } else if let Err(e) = entry.resource.rollback(&entry.xid) {
                debug!(xid = %entry.xid, error = %e, "rollback after failed commit failed");
                if matches!(e.code, XaErrorCode::HeurCommit | XaErrorCode::HeurMixed) {
                    outcome = outcome.escalate_to_mixed(e.code);
                }
            }
            self.reset_timeout(entry.resource.as_ref());
        }

        outcome
    }

    /// Roll back the transaction
    ///
    /// Participant failures are logged, never returned; the only error is
    /// calling this outside a transaction.
    pub fn rollback(&mut self) -> Result<()> {
        self.sync_signals();
        self.alarm.dequeue();

        match self.status {
            TransactionStatus::Active | TransactionStatus::MarkedRollbackOnly => {}
            TransactionStatus::NoTransaction => {
                return Err(Error::illegal_state(
                    "cannot roll back outside of a transaction; either begin() is missing \
                     or the transaction has already completed",
                ))
            }
            other => {
                self.rollback_participants();
                self.after_completion();
                return Err(Error::illegal_state(format!(
                    "cannot roll back in state {}",
                    other
                )));
            }
        }

        if let Err(reason) = self.before_completion() {
            debug!(xid = ?self.xid, reason = %reason, "before-completion failed during rollback");
        }

        self.status = TransactionStatus::MarkedRollbackOnly;
        let summary = self.rollback_participants();
        if summary.heuristic_commits > 0 || summary.failures > 0 {
            warn!(
                xid = ?self.xid,
                heuristic_commits = summary.heuristic_commits,
                failures = summary.failures,
                "rollback incomplete"
            );
        }
        self.after_completion();
        Ok(())
    }

    // ========================================================================
    // Suspend / resume
    // ========================================================================

    /// Suspend every active participant and stop the timeout
    pub fn suspend(&mut self) -> Result<()> {
        if self.suspended {
            return Err(Error::illegal_state(
                "cannot suspend an already-suspended transaction",
            ));
        }
        self.suspended = true;
        self.alarm.dequeue();

        let mut failure = None;
        for entry in self.enlisted.iter_mut().rev() {
            if entry.flags.contains(BranchFlags::ACTIVE)
                && !entry.flags.contains(BranchFlags::SUSPENDED)
            {
                match entry.resource.end(&entry.xid, EndFlag::Suspend) {
                    Ok(()) => entry.flags.insert(BranchFlags::SUSPENDED),
                    Err(e) => failure = Some(e),
                }
            }
        }
        if let Some(e) = failure {
            self.mark_rollback_only(format!("suspend failed: {}", e), Some(e.code));
        }

        debug!(xid = ?self.xid, "suspended");
        Ok(())
    }

    /// Resume suspended participants and re-arm the timeout
    pub fn resume(&mut self) -> Result<()> {
        if !self.suspended {
            return Err(Error::illegal_state("cannot resume a non-suspended transaction"));
        }

        if let Some(t) = self.timeout {
            if self.status == TransactionStatus::Active {
                self.alarm.queue(t);
            }
        }

        let mut failure = None;
        for entry in self.enlisted.iter_mut().rev() {
            if entry
                .flags
                .contains(BranchFlags::ACTIVE | BranchFlags::SUSPENDED)
            {
                entry.flags.remove(BranchFlags::SUSPENDED);
                if let Err(e) = entry.resource.start(&entry.xid, StartFlag::Resume) {
                    failure = Some(e);
                }
            }
        }
        if let Some(e) = failure {
            self.mark_rollback_only(format!("resume failed: {}", e), Some(e.code));
        }

        self.suspended = false;
        debug!(xid = ?self.xid, "resumed");
        Ok(())
    }

    /// Roll back anything pending and make the coordinator unusable
    pub fn close(&mut self) {
        self.dead = true;
        self.alarm.dequeue();

        if self.status != TransactionStatus::NoTransaction {
            if let Err(e) = self.rollback() {
                debug!(error = %e, "rollback on close failed");
            }
        }

        self.synchronizations.clear();
        self.interposed.clear();
        self.enlisted.clear();
        self.resources.clear();
        self.xid = None;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Fold the rollback signal and an expired deadline into the status
    fn sync_signals(&mut self) {
        if self.status != TransactionStatus::Active {
            return;
        }
        if let Some(cause) = self.signal.take() {
            self.mark_rollback_only(cause, None);
        } else if self.alarm.has_fired(Instant::now()) {
            let secs = self.timeout.map(|t| t.as_secs()).unwrap_or(0);
            warn!(xid = ?self.xid, timeout_secs = secs, "transaction timed out");
            self.alarm.dequeue();
            self.mark_rollback_only(
                format!("transaction timed out after {} seconds", secs),
                Some(XaErrorCode::RbTimeout),
            );
        }
    }

    fn mark_rollback_only(&mut self, reason: String, code: Option<XaErrorCode>) {
        match self.status {
            TransactionStatus::Active | TransactionStatus::MarkedRollbackOnly => {
                self.status = TransactionStatus::MarkedRollbackOnly;
                debug!(xid = ?self.xid, reason = %reason, "rollback-only");
                if self.rollback_cause.is_none() {
                    self.rollback_cause = Some(RollbackCause { reason, code });
                }
            }
            other => trace!(status = %other, reason = %reason, "rollback-only ignored"),
        }
    }

    fn rollback_error(&self) -> Error {
        match &self.rollback_cause {
            Some(c) => Error::Rollback {
                reason: c.reason.clone(),
                code: c.code,
            },
            None => Error::rollback("transaction is marked rollback-only"),
        }
    }

    fn push_timeout(&self, resource: &dyn XaResource) -> xapool_core::XaResult<()> {
        if let Some(t) = self.timeout {
            let secs = u32::try_from(t.as_secs()).unwrap_or(u32::MAX);
            resource.set_transaction_timeout(secs)?;
        }
        Ok(())
    }

    fn reset_timeout(&self, resource: &dyn XaResource) {
        if self.timeout.is_some() {
            if let Err(e) = resource.set_transaction_timeout(0) {
                trace!(error = %e, "failed to reset participant timeout");
            }
        }
    }

    /// Synchronizations, then end every active participant
    ///
    /// Returns the veto reason if a synchronization failed; the transaction
    /// is then marked rollback-only.
    fn before_completion(&mut self) -> std::result::Result<(), String> {
        self.alarm.dequeue();

        let syncs: Vec<_> = self
            .synchronizations
            .iter()
            .chain(self.interposed.iter())
            .cloned()
            .collect();
        for sync in syncs {
            if let Err(e) = sync.before_completion() {
                let reason = format!("before-completion callback failed: {}", e);
                self.mark_rollback_only(reason.clone(), None);
                return Err(reason);
            }
        }

        let flag = if self.status == TransactionStatus::MarkedRollbackOnly {
            EndFlag::Fail
        } else {
            EndFlag::Success
        };
        let mut failure = None;
        for entry in self.enlisted.iter_mut().rev() {
            if !entry.flags.contains(BranchFlags::ACTIVE) {
                continue;
            }
            entry.flags.remove(BranchFlags::ACTIVE);
            if let Err(e) = entry.resource.end(&entry.xid, flag) {
                debug!(xid = %entry.xid, error = %e, "end failed");
                failure = Some(e);
            }
        }
        if let Some(e) = failure {
            self.mark_rollback_only(format!("end failed: {}", e), Some(e.code));
        }
        Ok(())
    }

    /// Roll back every participant that owns its branch, best effort
    fn rollback_participants(&mut self) -> RollbackSummary {
        self.status = TransactionStatus::RollingBack;
        debug!(xid = ?self.xid, participants = self.enlisted.len(), "rollback");

        let mut summary = RollbackSummary::default();
        for entry in &self.enlisted {
            if entry.flags.contains(BranchFlags::SHARED_RM)
                || entry.flags.contains(BranchFlags::READ_ONLY)
            {
                continue;
            }
            let result = entry.resource.rollback(&entry.xid);
            if let Err(e) = &result {
                debug!(xid = %entry.xid, error = %e, "participant rollback failed");
            }
            summary.record(&result);
            self.reset_timeout(entry.resource.as_ref());
        }

        self.status = TransactionStatus::RolledBack;
        summary
    }

    /// Reset to `NoTransaction`, write the finish record, then run the
    /// completion callbacks with the final status
    fn after_completion(&mut self) {
        let interposed = std::mem::take(&mut self.interposed);
        let syncs = std::mem::take(&mut self.synchronizations);
        let xid = self.xid.take();
        let status = std::mem::replace(&mut self.status, TransactionStatus::NoTransaction);

        self.rollback_cause = None;
        self.enlisted.clear();
        self.resources.clear();
        self.signal.clear();
        self.alarm.dequeue();

        if let (Some(log), Some(xid)) = (self.decision_log.take(), xid.as_ref()) {
            if let Err(e) = log.write_finish(xid) {
                debug!(xid = %xid, error = %e, "failed to write finish record");
            }
        }

        for sync in interposed.iter().chain(syncs.iter()) {
            trace!(status = %status, "after completion");
            sync.after_completion(status);
        }
    }
}

impl std::fmt::Display for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.xid {
            Some(xid) => write!(f, "Transaction{}", xid),
            None => write!(f, "Transaction[]"),
        }
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("xid", &self.xid)
            .field("status", &self.status)
            .field("enlisted", &self.enlisted.len())
            .field("suspended", &self.suspended)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Drop for TransactionCoordinator {
    fn drop(&mut self) {
        if self.status != TransactionStatus::NoTransaction {
            warn!(xid = ?self.xid, status = %self.status, "coordinator dropped with a pending transaction");
            self.close();
        }
    }
}
