//! Transaction timeouts

use crate::common::*;
use std::thread;
use std::time::Duration;
use xapool::TransactionConfig;
use xapool_testkit::XaCall;

#[test]
fn expired_transaction_rolls_back() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.set_transaction_timeout(1);
    scope.begin().unwrap();
    site.allocate("orders", &scope).close();
    site.allocate("inventory", &scope).close();

    // the participants were told the timeout
    assert!(site.xa("orders", 1).calls().contains(&XaCall::SetTimeout(1)));

    thread::sleep(Duration::from_millis(1200));
    assert_eq!(scope.status(), TransactionStatus::MarkedRollbackOnly);

    let err = scope.commit().unwrap_err();
    assert!(err.is_rollback());
    assert_eq!(err.xa_code(), Some(XaErrorCode::RbTimeout));
    assert!(err.to_string().contains("timed out"));
    for name in ["orders", "inventory"] {
        assert_eq!(site.xa(name, 1).commit_count(), 0);
        assert_eq!(site.xa(name, 1).rollback_count(), 1);
    }
}

#[test]
fn commit_within_timeout_succeeds() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.set_transaction_timeout(30);
    scope.begin().unwrap();
    site.allocate("orders", &scope).close();
    assert!(scope.is_active());
    scope.commit().unwrap();

    // the participant timeout is reset once its branch completes
    let calls = site.xa("orders", 1).calls();
    assert_eq!(calls.last(), Some(&XaCall::SetTimeout(0)));
}

/// The manager default applies to scopes that set nothing
#[test]
fn manager_default_timeout() {
    let site = SiteBuilder::new()
        .xa_pool("orders")
        .transaction(TransactionConfig::new().default_timeout(Duration::from_secs(1)))
        .build();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    site.allocate("orders", &scope).close();
    thread::sleep(Duration::from_millis(1200));

    assert!(scope.commit().unwrap_err().is_rollback());
}

/// A late connection cannot join a transaction that has already expired
#[test]
fn expired_transaction_enlists_nothing() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.set_transaction_timeout(1);
    scope.begin().unwrap();
    thread::sleep(Duration::from_millis(1200));

    let late = site.allocate("orders", &scope);
    assert_eq!(scope.enlisted_count(), 0);
    late.close();
    assert!(scope.rollback().is_ok());
}
