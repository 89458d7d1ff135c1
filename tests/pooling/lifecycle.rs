//! Idle ring, eviction, reaping and close

use crate::common::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use xapool::{PoolConfig, TransactionEnvironment};
use xapool_core::ConnectionRequest;
use xapool_testkit::{user_connection, MockFactory};

fn check_out(site: &Site) -> Arc<ResourceHandle> {
    site.env
        .pool("orders")
        .unwrap()
        .allocate(None, &Credential::anonymous(), &ConnectionRequest::new())
        .unwrap()
}

fn physical_id(handle: &ResourceHandle) -> u64 {
    user_connection(&handle.connection().unwrap())
        .unwrap()
        .physical_id()
}

/// Connections come back out of the idle ring oldest-returned first
#[test]
fn idle_reuse_is_first_in_first_out() {
    let site = SiteBuilder::new().pool(PoolConfig::new("orders")).build();
    let handles: Vec<_> = (0..3).map(|_| check_out(&site)).collect();
    let ids: Vec<_> = handles.iter().map(|h| physical_id(h)).collect();

    handles[2].close();
    handles[0].close();
    handles[1].close();

    let reused: Vec<_> = (0..3).map(|_| physical_id(&check_out(&site))).collect();
    assert_eq!(reused, vec![ids[2], ids[0], ids[1]]);
    assert_eq!(site.factory("orders").created_count(), 3);
}

#[test]
fn idle_ring_capacity_bounds_kept_connections() {
    let site = SiteBuilder::new()
        .pool(PoolConfig::new("orders").max_idle_count(1))
        .build();
    let a = check_out(&site);
    let b = check_out(&site);
    a.close();
    b.close();

    let pool = site.env.pool("orders").unwrap();
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.connection_count(), 1);
    let destroyed = site
        .factory("orders")
        .created()
        .iter()
        .filter(|c| c.is_destroyed())
        .count();
    assert_eq!(destroyed, 1);
}

/// A connection that reported an error is destroyed instead of idled
#[test]
fn errored_connection_not_reused() {
    let site = SiteBuilder::new().pool(PoolConfig::new("orders")).build();
    let handle = check_out(&site);
    handle.resource().unwrap().set_connection_error();
    handle.close();

    let pool = site.env.pool("orders").unwrap();
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.connection_count(), 0);
    assert!(site.factory("orders").connection(1).unwrap().is_destroyed());
    assert_eq!(physical_id(&check_out(&site)), 2);
}

#[test]
fn reaper_evicts_expired_idle_connections() {
    let factory = Arc::new(MockFactory::new("orders"));
    let env = TransactionEnvironment::builder()
        .pool(
            PoolConfig::new("orders").max_idle_time(Duration::from_millis(20)),
            factory.clone(),
        )
        .reaper(true)
        .build()
        .unwrap();
    env.start().unwrap();

    let scope = env.new_scope();
    env.allocate("orders", &scope).unwrap().close();
    let pool = env.pool("orders").unwrap();
    assert_eq!(pool.idle_count(), 1);

    let deadline = Instant::now() + Duration::from_secs(10);
    while pool.connection_count() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(pool.connection_count(), 0);
    assert_eq!(pool.idle_count(), 0);
    env.close();
}

/// Closing the environment destroys every connection and refuses new work
#[test]
fn closed_environment_rejects_allocation() {
    let site = three_pools();
    site.env.start().unwrap();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    let open = site.allocate("orders", &scope);
    site.env.close();

    assert_eq!(scope.status(), TransactionStatus::MarkedRollbackOnly);
    assert!(scope.commit().unwrap_err().is_rollback());
    assert!(open.connection().is_err());
    for name in ["orders", "inventory", "billing"] {
        let pool = site.env.pool(name).unwrap();
        assert!(!pool.is_open());
        assert!(matches!(
            site.env.allocate(name, &scope).unwrap_err(),
            Error::PoolClosed(_)
        ));
    }
    assert!(site
        .factory("orders")
        .created()
        .iter()
        .all(|c| c.is_destroyed()));
}

/// A caller blocked on a full pool takes the connection released by a
/// committing transaction
#[test]
fn waiter_served_after_commit() {
    let site = Arc::new(
        SiteBuilder::new()
            .pool(
                PoolConfig::new("orders")
                    .max_connections(1)
                    .max_overflow_connections(0)
                    .connection_wait_time(Duration::from_secs(10)),
            )
            .build(),
    );
    let scope = site.env.new_scope();
    scope.begin().unwrap();
    site.allocate("orders", &scope).close();

    let waiter = {
        let site = Arc::clone(&site);
        thread::spawn(move || {
            let scope = site.env.new_scope();
            let handle = site.allocate("orders", &scope);
            let id = physical_id(&handle);
            handle.close();
            id
        })
    };
    let pool = site.env.pool("orders").unwrap();
    while pool.wait_count() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    scope.commit().unwrap();

    assert_eq!(waiter.join().unwrap(), 1);
    assert_eq!(site.factory("orders").created_count(), 1);
}
