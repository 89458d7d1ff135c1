//! Recovery of in-doubt transactions from the file log

use crate::common::*;
use tempfile::TempDir;
use xapool::{FileXaLog, TransactionConfig, TransactionEnvironment};
use xapool_core::{TransactionId, XaLog};
use xapool_testkit::MockXaResource;

const SERVER: u64 = 7;

fn environment(dir: &TempDir) -> TransactionEnvironment {
    TransactionEnvironment::builder()
        .transaction(
            TransactionConfig::new()
                .server_id(SERVER)
                .log_path(dir.path().join("xa.log")),
        )
        .build()
        .unwrap()
}

/// A commit decision that survived a crash is honoured on restart; every
/// other prepared branch of this server is presumed aborted
#[test]
fn restart_commits_logged_decision() {
    let dir = TempDir::new().unwrap();

    // crash after the decision was logged, before the finish record
    let (decided, undecided) = {
        let env = environment(&dir);
        let decided = env.manager().create_xid();
        let undecided = env.manager().create_xid();
        env.manager().log().unwrap().write_commit(&decided).unwrap();
        (decided, undecided)
    };

    let env = environment(&dir);
    let log = env.manager().log().unwrap();
    assert_eq!(log.in_doubt().unwrap(), vec![decided.clone()]);

    let foreign = TransactionId::new(SERVER + 1, 1, 1);
    let rm = MockXaResource::new("orders").with_prepared(vec![
        decided.derive(2),
        undecided.derive(2),
        foreign.clone(),
    ]);

    let report = env.manager().recover(&rm).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.scanned, 3);
    assert_eq!(report.committed, vec![decided.derive(2)]);
    assert_eq!(report.rolled_back, vec![undecided.derive(2)]);
    assert_eq!(report.skipped, 1);
    assert_eq!(rm.prepared(), vec![foreign]);

    let started = env.start().unwrap();
    assert_eq!(started.completed, 1);
    assert!(log.in_doubt().unwrap().is_empty());
    drop(log);
    drop(env);

    // the finish record is durable too
    let reopened = FileXaLog::open(dir.path().join("xa.log")).unwrap();
    assert!(reopened.in_doubt().unwrap().is_empty());
    assert_eq!(reopened.records_written(), 2);
}

/// Without a decision, recovery rolls every local branch back
#[test]
fn presumed_abort_without_log() {
    let env = TransactionEnvironment::builder()
        .transaction(TransactionConfig::new().server_id(SERVER))
        .build()
        .unwrap();
    let xid = env.manager().create_xid();
    let rm = MockXaResource::new("orders").with_prepared(vec![xid.clone()]);

    let report = env.manager().recover(&rm).unwrap();
    assert!(report.committed.is_empty());
    assert_eq!(report.rolled_back, vec![xid]);
    assert_eq!(env.start().unwrap().completed, 0);
}

/// Transactions committed through pools leave nothing in doubt
#[test]
fn clean_commits_leave_log_empty() {
    let dir = TempDir::new().unwrap();
    let site = SiteBuilder::new()
        .xa_pool("orders")
        .xa_pool("inventory")
        .transaction(
            TransactionConfig::new()
                .server_id(SERVER)
                .log_path(dir.path().join("xa.log")),
        )
        .build();
    site.env.start().unwrap();

    let scope = site.env.new_scope();
    for _ in 0..3 {
        scope.begin().unwrap();
        site.allocate("orders", &scope).close();
        site.allocate("inventory", &scope).close();
        scope.commit().unwrap();
    }
    site.env.close();
    drop(site);

    let log = FileXaLog::open(dir.path().join("xa.log")).unwrap();
    assert!(log.in_doubt().unwrap().is_empty());
    assert_eq!(log.records_written(), 6);
}

/// Pools scan their resource manager when the environment starts
#[test]
fn start_scans_every_pool() {
    let site = three_pools();
    let report = site.env.start().unwrap();

    let names: Vec<_> = report.recovered.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["billing", "inventory", "orders"]);
    assert!(report.recovered.iter().all(|(_, r)| r.is_clean()));
    for name in ["orders", "inventory", "billing"] {
        // the scan connection is opened for recovery only
        assert!(site.factory(name).connection(1).unwrap().is_destroyed());
        assert_eq!(site.env.pool(name).unwrap().connection_count(), 0);
    }
}
