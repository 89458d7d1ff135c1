//! Scripted resource manager

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use xapool_core::{
    EndFlag, RecoverFlag, StartFlag, TransactionId, Vote, XaError, XaErrorCode, XaResource,
    XaResult,
};

/// One call observed by a [`MockXaResource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XaCall {
    /// `start(xid, flag)`
    Start(TransactionId, StartFlag),
    /// `end(xid, flag)`
    End(TransactionId, EndFlag),
    /// `prepare(xid)`
    Prepare(TransactionId),
    /// `commit(xid, one_phase)`
    Commit(TransactionId, bool),
    /// `rollback(xid)`
    Rollback(TransactionId),
    /// `forget(xid)`
    Forget(TransactionId),
    /// `set_transaction_timeout(seconds)`
    SetTimeout(u32),
    /// `recover(flag)`
    Recover(RecoverFlag),
}

#[derive(Debug, Default)]
struct Script {
    vote: Option<Vote>,
    fail_start: Option<XaErrorCode>,
    fail_end: Option<XaErrorCode>,
    fail_prepare: Option<XaErrorCode>,
    fail_commit: Option<XaErrorCode>,
    fail_rollback: Option<XaErrorCode>,
    prepared: Vec<TransactionId>,
}

/// Resource manager whose answers are scripted by the test
///
/// Every call is recorded; failures are injected per operation with an XA
/// error code. Scripts can be changed while the resource is enlisted.
#[derive(Debug)]
pub struct MockXaResource {
    name: String,
    rm_id: Option<String>,
    script: Mutex<Script>,
    calls: Mutex<Vec<XaCall>>,
    detached: AtomicBool,
    late_calls: AtomicUsize,
}

impl MockXaResource {
    /// Resource with no resource-manager identity (never joins)
    pub fn new(name: impl Into<String>) -> Self {
        MockXaResource {
            name: name.into(),
            rm_id: None,
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
            late_calls: AtomicUsize::new(0),
        }
    }

    /// Set the resource-manager identity used by `is_same_rm`
    pub fn with_rm_id(mut self, rm_id: impl Into<String>) -> Self {
        self.rm_id = Some(rm_id.into());
        self
    }

    /// Vote returned by `prepare`
    pub fn with_vote(self, vote: Vote) -> Self {
        self.set_vote(vote);
        self
    }

    /// Make `prepare` fail with `code`
    pub fn failing_prepare(self, code: XaErrorCode) -> Self {
        self.script.lock().fail_prepare = Some(code);
        self
    }

    /// Make `commit` fail with `code`
    pub fn failing_commit(self, code: XaErrorCode) -> Self {
        self.script.lock().fail_commit = Some(code);
        self
    }

    /// Make `rollback` fail with `code`
    pub fn failing_rollback(self, code: XaErrorCode) -> Self {
        self.script.lock().fail_rollback = Some(code);
        self
    }

    /// Make `start` fail with `code`
    pub fn failing_start(self, code: XaErrorCode) -> Self {
        self.script.lock().fail_start = Some(code);
        self
    }

    /// Make `end` fail with `code`
    pub fn failing_end(self, code: XaErrorCode) -> Self {
        self.script.lock().fail_end = Some(code);
        self
    }

    /// Branches reported by `recover`
    pub fn with_prepared(self, xids: Vec<TransactionId>) -> Self {
        self.script.lock().prepared = xids;
        self
    }

    /// Change the vote after construction
    pub fn set_vote(&self, vote: Vote) {
        self.script.lock().vote = Some(vote);
    }

    /// Change the prepare failure after construction
    pub fn set_prepare_failure(&self, code: Option<XaErrorCode>) {
        self.script.lock().fail_prepare = code;
    }

    /// Change the commit failure after construction
    pub fn set_commit_failure(&self, code: Option<XaErrorCode>) {
        self.script.lock().fail_commit = code;
    }

    /// Change the start failure after construction
    pub fn set_start_failure(&self, code: Option<XaErrorCode>) {
        self.script.lock().fail_start = code;
    }

    /// Name given at construction
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every call observed so far
    pub fn calls(&self) -> Vec<XaCall> {
        self.calls.lock().clone()
    }

    /// Branches still reported by `recover`
    pub fn prepared(&self) -> Vec<TransactionId> {
        self.script.lock().prepared.clone()
    }

    /// Number of `start` calls
    pub fn start_count(&self) -> usize {
        self.count(|c| matches!(c, XaCall::Start(..)))
    }

    /// Number of `end` calls
    pub fn end_count(&self) -> usize {
        self.count(|c| matches!(c, XaCall::End(..)))
    }

    /// Number of `prepare` calls
    pub fn prepare_count(&self) -> usize {
        self.count(|c| matches!(c, XaCall::Prepare(_)))
    }

    /// Number of `commit` calls, one- and two-phase
    pub fn commit_count(&self) -> usize {
        self.count(|c| matches!(c, XaCall::Commit(..)))
    }

    /// Number of one-phase `commit` calls
    pub fn one_phase_commit_count(&self) -> usize {
        self.count(|c| matches!(c, XaCall::Commit(_, true)))
    }

    /// Number of `rollback` calls
    pub fn rollback_count(&self) -> usize {
        self.count(|c| matches!(c, XaCall::Rollback(_)))
    }

    /// Calls that arrived after the owning connection was destroyed
    pub fn calls_after_destroy(&self) -> usize {
        self.late_calls.load(Ordering::SeqCst)
    }

    /// The owning physical connection is gone
    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    /// Forget recorded calls
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    fn count(&self, pred: impl Fn(&XaCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: XaCall) {
        if self.detached.load(Ordering::SeqCst) {
            self.late_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.calls.lock().push(call);
    }

    fn fail(code: Option<XaErrorCode>) -> XaResult<()> {
        match code {
            Some(code) => Err(XaError::new(code)),
            None => Ok(()),
        }
    }
}

impl XaResource for MockXaResource {
    fn resource_manager_id(&self) -> Option<&str> {
        self.rm_id.as_deref()
    }

    fn start(&self, xid: &TransactionId, flag: StartFlag) -> XaResult<()> {
        self.record(XaCall::Start(xid.clone(), flag));
        Self::fail(self.script.lock().fail_start)
    }

    fn end(&self, xid: &TransactionId, flag: EndFlag) -> XaResult<()> {
        self.record(XaCall::End(xid.clone(), flag));
        Self::fail(self.script.lock().fail_end)
    }

    fn prepare(&self, xid: &TransactionId) -> XaResult<Vote> {
        self.record(XaCall::Prepare(xid.clone()));
        let script = self.script.lock();
        Self::fail(script.fail_prepare)?;
        Ok(script.vote.unwrap_or(Vote::Ok))
    }

    fn commit(&self, xid: &TransactionId, one_phase: bool) -> XaResult<()> {
        self.record(XaCall::Commit(xid.clone(), one_phase));
        let mut script = self.script.lock();
        Self::fail(script.fail_commit)?;
        script.prepared.retain(|p| p != xid);
        Ok(())
    }

    fn rollback(&self, xid: &TransactionId) -> XaResult<()> {
        self.record(XaCall::Rollback(xid.clone()));
        let mut script = self.script.lock();
        Self::fail(script.fail_rollback)?;
        script.prepared.retain(|p| p != xid);
        Ok(())
    }

    fn forget(&self, xid: &TransactionId) -> XaResult<()> {
        self.record(XaCall::Forget(xid.clone()));
        Ok(())
    }

    fn set_transaction_timeout(&self, seconds: u32) -> XaResult<bool> {
        self.record(XaCall::SetTimeout(seconds));
        Ok(true)
    }

    fn recover(&self, flag: RecoverFlag) -> XaResult<Vec<TransactionId>> {
        self.record(XaCall::Recover(flag));
        Ok(self.script.lock().prepared.clone())
    }
}
