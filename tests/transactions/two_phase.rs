//! Commit protocol across pools

use crate::common::*;
use std::sync::Arc;
use xapool::{MemoryXaLog, PoolConfig};
use xapool_core::{Vote, XaLog};
use xapool_testkit::{RecordingSynchronization, XaCall};

// ============================================================================
// One participant
// ============================================================================

/// A lone connection commits through the driver's local transaction
#[test]
fn single_connection_commits_locally() {
    let site = SiteBuilder::new().pool(PoolConfig::new("orders")).build();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    let handle = site.allocate("orders", &scope);
    handle.close();
    scope.commit().unwrap();

    let conn = site.factory("orders").connection(1).unwrap();
    assert_eq!(conn.local().unwrap().begin_count(), 1);
    assert_eq!(conn.local().unwrap().commit_count(), 1);
    let xa = site.xa("orders", 1);
    assert_eq!(xa.start_count(), 0);
    assert_eq!(xa.prepare_count(), 0);
    assert_eq!(scope.status(), TransactionStatus::NoTransaction);
}

/// A lone XA participant is committed in one phase, never prepared
#[test]
fn single_xa_participant_skips_prepare() {
    let site = SiteBuilder::new().xa_pool("orders").build();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    site.allocate("orders", &scope).close();
    scope.commit().unwrap();

    let xa = site.xa("orders", 1);
    assert_eq!(xa.prepare_count(), 0);
    assert_eq!(xa.one_phase_commit_count(), 1);
    assert_eq!(site.env.pool("orders").unwrap().idle_count(), 1);
}

// ============================================================================
// Several resource managers
// ============================================================================

#[test]
fn three_pools_prepare_then_commit() {
    let site = three_pools();
    let scope = site.env.new_scope();
    let sync = Arc::new(RecordingSynchronization::new());

    scope.begin().unwrap();
    scope.register_synchronization(sync.clone());
    let handles: Vec<_> = ["orders", "inventory", "billing"]
        .iter()
        .map(|name| site.allocate(name, &scope))
        .collect();
    assert_eq!(scope.enlisted_count(), 3);
    for handle in &handles {
        handle.close();
    }
    scope.commit().unwrap();

    // without a log the first participant is committed last-resource style
    let orders = site.xa("orders", 1);
    assert_eq!(orders.prepare_count(), 0);
    assert_eq!(orders.one_phase_commit_count(), 1);
    for name in ["inventory", "billing"] {
        let xa = site.xa(name, 1);
        assert_eq!(xa.prepare_count(), 1, "{} prepared", name);
        assert_eq!(xa.commit_count(), 1, "{} committed", name);
        assert_eq!(xa.one_phase_commit_count(), 0);
    }
    assert_eq!(sync.before_count(), 1);
    assert_eq!(sync.after_statuses(), vec![TransactionStatus::Committed]);
}

/// Every participant sees one branch of the same global transaction
#[test]
fn branches_share_global_id() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    let root = scope.xid().unwrap();
    for name in ["orders", "inventory", "billing"] {
        site.allocate(name, &scope).close();
    }
    scope.commit().unwrap();

    let mut branches = Vec::new();
    for name in ["orders", "inventory", "billing"] {
        match &site.xa(name, 1).calls()[0] {
            XaCall::Start(xid, _) => {
                assert!(xid.same_transaction(&root));
                branches.push(xid.branch().to_vec());
            }
            other => panic!("{} first call was {:?}", name, other),
        }
    }
    branches.sort();
    branches.dedup();
    assert_eq!(branches.len(), 3);
}

/// Participant 2 votes abort: nobody commits, everyone rolls back
#[test]
fn prepare_failure_rolls_back_every_participant() {
    let site = three_pools();
    let scope = site.env.new_scope();
    let sync = Arc::new(RecordingSynchronization::new());

    scope.begin().unwrap();
    scope.register_synchronization(sync.clone());
    for name in ["orders", "inventory", "billing"] {
        site.allocate(name, &scope).close();
    }
    site.xa("inventory", 1)
        .set_prepare_failure(Some(XaErrorCode::RbIntegrity));

    let err = scope.commit().unwrap_err();
    assert!(err.is_rollback());
    assert_eq!(err.xa_code(), Some(XaErrorCode::RbIntegrity));

    for name in ["orders", "inventory", "billing"] {
        let xa = site.xa(name, 1);
        assert_eq!(xa.commit_count(), 0, "{} committed", name);
        assert_eq!(xa.rollback_count(), 1, "{} rolled back", name);
    }
    assert_eq!(sync.after_statuses(), vec![TransactionStatus::RolledBack]);
    assert_eq!(scope.status(), TransactionStatus::NoTransaction);
    for name in ["orders", "inventory", "billing"] {
        assert_eq!(site.env.pool(name).unwrap().idle_count(), 1);
    }
}

#[test]
fn read_only_participant_is_not_committed() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    for name in ["orders", "inventory", "billing"] {
        site.allocate(name, &scope).close();
    }
    site.xa("billing", 1).set_vote(Vote::ReadOnly);
    scope.commit().unwrap();

    let billing = site.xa("billing", 1);
    assert_eq!(billing.prepare_count(), 1);
    assert_eq!(billing.commit_count(), 0);
    assert_eq!(billing.rollback_count(), 0);
    assert_eq!(site.xa("inventory", 1).commit_count(), 1);
    assert_eq!(site.env.pool("billing").unwrap().idle_count(), 1);
}

/// A read-only voter is finished: a later prepare failure rolls back the
/// others without touching its already idle connection
#[test]
fn read_only_voter_untouched_by_rollback() {
    let site = three_pools();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    for name in ["orders", "inventory", "billing"] {
        site.allocate(name, &scope).close();
    }
    site.xa("billing", 1).set_vote(Vote::ReadOnly);
    site.xa("inventory", 1)
        .set_prepare_failure(Some(XaErrorCode::RbRollback));

    assert!(scope.commit().unwrap_err().is_rollback());

    let billing = site.xa("billing", 1);
    assert_eq!(billing.prepare_count(), 1);
    assert_eq!(billing.rollback_count(), 0);
    assert!(!billing
        .calls()
        .iter()
        .any(|c| matches!(c, XaCall::Rollback(_) | XaCall::Commit(..))));
    assert!(!site.factory("billing").connection(1).unwrap().is_destroyed());
    let pool = site.env.pool("billing").unwrap();
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.connection_count(), 1);

    for name in ["orders", "inventory"] {
        assert_eq!(site.xa(name, 1).rollback_count(), 1, "{} rolled back", name);
    }

    // the idle connection serves the next transaction
    scope.begin().unwrap();
    site.allocate("billing", &scope).close();
    scope.commit().unwrap();
    assert_eq!(site.factory("billing").created_count(), 1);
}

/// With a decision log every participant is prepared and the decision is
/// closed once all have committed
#[test]
fn logged_commit_prepares_everyone() {
    let log = Arc::new(MemoryXaLog::new());
    let site = SiteBuilder::new()
        .xa_pool("orders")
        .xa_pool("inventory")
        .log(log.clone())
        .build();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    let root = scope.xid().unwrap();
    site.allocate("orders", &scope).close();
    site.allocate("inventory", &scope).close();
    scope.commit().unwrap();

    for name in ["orders", "inventory"] {
        let xa = site.xa(name, 1);
        assert_eq!(xa.prepare_count(), 1);
        assert_eq!(xa.commit_count(), 1);
        assert_eq!(xa.one_phase_commit_count(), 0);
    }
    let records = log.records();
    assert_eq!(records.len(), 2);
    assert!(records[0].is_commit());
    assert_eq!(records[0].xid(), &root);
    assert!(log.in_doubt().unwrap().is_empty());
}

/// Connections return to their pools after commit and serve the next
/// transaction without new physical connections
#[test]
fn connections_reused_across_transactions() {
    let site = three_pools();
    let scope = site.env.new_scope();

    for _ in 0..5 {
        scope.begin().unwrap();
        for name in ["orders", "inventory", "billing"] {
            site.allocate(name, &scope).close();
        }
        scope.commit().unwrap();
    }

    for name in ["orders", "inventory", "billing"] {
        assert_eq!(site.factory(name).created_count(), 1);
        assert_eq!(site.env.pool(name).unwrap().stats().allocations, 5);
    }
    assert_eq!(site.xa("inventory", 1).commit_count(), 5);
}
