//! Rollback, rollback-only and abort

use crate::common::*;
use std::sync::Arc;
use xapool::PoolConfig;
use xapool_core::EndFlag;
use xapool_testkit::{RecordingSynchronization, XaCall};

// ============================================================================
// Explicit rollback
// ============================================================================

#[test]
fn rollback_reaches_every_participant() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    for name in ["orders", "inventory", "billing"] {
        site.allocate(name, &scope).close();
    }
    scope.rollback().unwrap();

    for name in ["orders", "inventory", "billing"] {
        let xa = site.xa(name, 1);
        assert_eq!(xa.prepare_count(), 0);
        assert_eq!(xa.commit_count(), 0);
        assert_eq!(xa.rollback_count(), 1);
        assert_eq!(site.env.pool(name).unwrap().idle_count(), 1);
    }
    assert!(!scope.is_active());
}

#[test]
fn rollback_outside_transaction_is_illegal() {
    let site = three_pools();
    let scope = site.env.new_scope();
    assert!(scope.rollback().unwrap_err().is_illegal_state());
    assert!(scope.commit().unwrap_err().is_illegal_state());
}

// ============================================================================
// Rollback-only
// ============================================================================

/// Once marked, the transaction can only roll back and the recorded cause
/// is reported by commit
#[test]
fn rollback_only_is_locked_in() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    site.allocate("orders", &scope).close();
    scope.set_rollback_only_with("audit check failed").unwrap();
    assert_eq!(scope.status(), TransactionStatus::MarkedRollbackOnly);
    assert!(!scope.is_active());

    // a second mark keeps the first cause
    scope.set_rollback_only_with("ignored").unwrap();

    let err = scope.commit().unwrap_err();
    assert!(err.is_rollback());
    let message = err.to_string();
    assert!(message.contains("audit check failed"), "{}", message);
    assert!(!message.contains("ignored"));

    let orders = site.xa("orders", 1);
    assert_eq!(orders.commit_count(), 0);
    assert_eq!(orders.rollback_count(), 1);
    assert!(orders
        .calls()
        .iter()
        .any(|c| matches!(c, XaCall::End(_, EndFlag::Fail))));
}

/// Connections checked out after the mark are not enlisted
#[test]
fn late_connection_not_enlisted_after_mark() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    site.allocate("orders", &scope).close();
    scope.set_rollback_only().unwrap();

    let late = site.allocate("inventory", &scope);
    assert_eq!(scope.enlisted_count(), 1);
    assert_eq!(site.xa("inventory", 1).start_count(), 0);
    late.close();

    assert!(scope.commit().unwrap_err().is_rollback());
    assert_eq!(site.xa("inventory", 1).rollback_count(), 0);
}

#[test]
fn synchronization_veto_rolls_back() {
    let site = three_pools();
    let scope = site.env.new_scope();
    let veto = Arc::new(RecordingSynchronization::vetoing("stale read"));
    let observer = Arc::new(RecordingSynchronization::new());

    scope.begin().unwrap();
    scope.register_synchronization(veto.clone());
    scope.register_interposed_synchronization(observer.clone());
    site.allocate("orders", &scope).close();
    site.allocate("inventory", &scope).close();

    let err = scope.commit().unwrap_err();
    assert!(err.is_rollback());
    assert!(err.to_string().contains("stale read"));
    for name in ["orders", "inventory"] {
        assert_eq!(site.xa(name, 1).commit_count(), 0);
        assert_eq!(site.xa(name, 1).rollback_count(), 1);
    }
    assert_eq!(veto.after_statuses(), vec![TransactionStatus::RolledBack]);
    assert_eq!(observer.after_statuses(), vec![TransactionStatus::RolledBack]);
}

/// Losing a physical connection mid-transaction dooms the transaction
#[test]
fn destroyed_connection_forces_rollback() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    site.allocate("orders", &scope).close();
    let inventory = site.allocate("inventory", &scope);
    inventory.abort();

    assert_eq!(scope.status(), TransactionStatus::MarkedRollbackOnly);
    assert!(scope.commit().unwrap_err().is_rollback());
    assert_eq!(site.xa("orders", 1).rollback_count(), 1);
    assert!(site.factory("inventory").connection(1).unwrap().is_destroyed());
    assert_eq!(site.env.pool("inventory").unwrap().connection_count(), 0);
}

// ============================================================================
// Abort
// ============================================================================

/// Abort rolls back, closes what was left open and reports it; a second
/// abort finds nothing to do
#[test]
fn abort_is_idempotent() {
    let site = SiteBuilder::new()
        .pool(PoolConfig::new("orders").save_allocation_trace(true))
        .build();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    let dangling = site.allocate("orders", &scope);

    let err = scope.abort().unwrap_err();
    assert!(err.is_illegal_state());
    assert!(dangling.is_closed());
    assert_eq!(scope.status(), TransactionStatus::NoTransaction);
    let conn = site.factory("orders").connection(1).unwrap();
    assert_eq!(conn.local().unwrap().rollback_count(), 1);

    scope.abort().unwrap();
    scope.abort().unwrap();
    assert_eq!(conn.local().unwrap().rollback_count(), 1);
}

#[test]
fn abort_after_clean_commit_succeeds() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    site.allocate("orders", &scope).close();
    scope.commit().unwrap();

    scope.abort().unwrap();
    assert_eq!(site.xa("orders", 1).rollback_count(), 0);
}

// ============================================================================
// Failed begin
// ============================================================================

/// When a cached connection cannot join a new transaction, the ones already
/// started are rolled back while still open, then discarded
#[test]
fn failed_begin_rolls_back_before_destroying() {
    let site = three_pools();
    let scope = site.env.new_scope();
    let orders = site.allocate("orders", &scope);
    let inventory = site.allocate("inventory", &scope);
    site.xa("inventory", 1)
        .set_start_failure(Some(XaErrorCode::RmFail));

    let err = scope.begin().unwrap_err();
    assert!(matches!(err, Error::System { .. }));
    assert!(!scope.is_active());

    let xa = site.xa("orders", 1);
    assert_eq!(xa.start_count(), 1);
    assert_eq!(xa.rollback_count(), 1);
    assert_eq!(xa.calls_after_destroy(), 0);
    for name in ["orders", "inventory"] {
        assert!(site.factory(name).connection(1).unwrap().is_destroyed());
        let pool = site.env.pool(name).unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.connection_count(), 0);
    }
    assert!(orders.connection().is_err());
    assert!(inventory.connection().is_err());
}
