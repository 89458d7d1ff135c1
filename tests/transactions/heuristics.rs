//! Commit-phase failures and heuristic outcomes

use crate::common::*;
use std::sync::Arc;
use xapool::MemoryXaLog;
use xapool_core::XaLog;

fn logged_site() -> (Site, Arc<MemoryXaLog>) {
    let log = Arc::new(MemoryXaLog::new());
    let site = SiteBuilder::new()
        .xa_pool("orders")
        .xa_pool("inventory")
        .log(log.clone())
        .build();
    (site, log)
}

fn enlist_both(site: &Site, scope: &Arc<TransactionScope>) {
    scope.begin().unwrap();
    site.allocate("orders", scope).close();
    site.allocate("inventory", scope).close();
}

/// The first committer rolls back heuristically: the rest are rolled back
/// instead of committed
#[test]
fn first_commit_heuristic_rollback() {
    let (site, log) = logged_site();
    let scope = site.env.new_scope();
    enlist_both(&site, &scope);
    site.xa("orders", 1)
        .set_commit_failure(Some(XaErrorCode::HeurRollback));

    let err = scope.commit().unwrap_err();
    assert!(err.is_heuristic());
    assert!(matches!(err, Error::HeuristicRollback { participants: 2, .. }));

    let inventory = site.xa("inventory", 1);
    assert_eq!(inventory.prepare_count(), 1);
    assert_eq!(inventory.commit_count(), 0);
    assert_eq!(inventory.rollback_count(), 1);
    // the decision record is still closed
    assert!(log.in_doubt().unwrap().is_empty());
}

/// A failure after another participant committed is a mixed outcome
#[test]
fn later_commit_failure_is_mixed() {
    let (site, _log) = logged_site();
    let scope = site.env.new_scope();
    enlist_both(&site, &scope);
    site.xa("inventory", 1)
        .set_commit_failure(Some(XaErrorCode::RbIntegrity));

    let err = scope.commit().unwrap_err();
    assert!(matches!(err, Error::HeuristicMixed { participants: 2, .. }));
    assert_eq!(site.xa("orders", 1).commit_count(), 1);
}

/// Heuristic-hazard leaves the committed outcome standing
#[test]
fn hazard_does_not_fail_commit() {
    let (site, _log) = logged_site();
    let scope = site.env.new_scope();
    enlist_both(&site, &scope);
    site.xa("inventory", 1)
        .set_commit_failure(Some(XaErrorCode::HeurHazard));

    scope.commit().unwrap();
    assert_eq!(site.xa("orders", 1).commit_count(), 1);
}

/// An unclassified resource-manager error surfaces as a system failure
#[test]
fn unexpected_commit_error_is_system() {
    let site = SiteBuilder::new().xa_pool("orders").build();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    site.allocate("orders", &scope).close();
    site.xa("orders", 1)
        .set_commit_failure(Some(XaErrorCode::RmFail));

    let err = scope.commit().unwrap_err();
    assert!(err.is_system());
    assert!(!err.is_retryable());
    assert_eq!(err.xa_code(), Some(XaErrorCode::RmFail));
    assert_eq!(scope.status(), TransactionStatus::NoTransaction);

    // the scope is usable for the next transaction
    site.xa("orders", 1).set_commit_failure(None);
    scope.begin().unwrap();
    site.allocate("orders", &scope).close();
    scope.commit().unwrap();
}
