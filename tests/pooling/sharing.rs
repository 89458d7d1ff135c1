//! Which handles may share a physical connection

use crate::common::*;
use std::sync::Arc;
use xapool::PoolConfig;
use xapool_core::ConnectionRequest;
use xapool_testkit::user_connection;

fn physical(handle: &ResourceHandle) -> u64 {
    user_connection(&handle.connection().unwrap())
        .unwrap()
        .physical_id()
}

#[test]
fn same_credential_shares_within_transaction() {
    let site = SiteBuilder::new().pool(PoolConfig::new("orders")).build();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    let a = site.allocate("orders", &scope);
    let b = site.allocate("orders", &scope);
    assert_eq!(physical(&a), physical(&b));
    assert_eq!(site.factory("orders").created_count(), 1);
    assert_eq!(scope.enlisted_count(), 1);

    a.close();
    b.close();
    scope.commit().unwrap();
    let conn = site.factory("orders").connection(1).unwrap();
    assert_eq!(conn.local().unwrap().commit_count(), 1);
}

#[test]
fn different_credentials_never_share() {
    let site = SiteBuilder::new().xa_pool("orders").build();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    let alice = site
        .env
        .allocate_as("orders", &scope, &Credential::new("alice"), &ConnectionRequest::new())
        .unwrap();
    let bob = site
        .env
        .allocate_as("orders", &scope, &Credential::new("bob"), &ConnectionRequest::new())
        .unwrap();
    assert_ne!(physical(&alice), physical(&bob));

    // same resource manager: bob's connection joins alice's branch
    let (ra, rb) = (alice.resource().unwrap(), bob.resource().unwrap());
    assert_eq!(ra.xid(), rb.xid());

    alice.close();
    bob.close();
    scope.commit().unwrap();
    assert_eq!(site.xa("orders", 1).commit_count(), 1);
    assert_eq!(site.xa("orders", 2).commit_count(), 0);
}

#[test]
fn different_requests_never_share() {
    let site = SiteBuilder::new().pool(PoolConfig::new("orders")).build();
    let scope = site.env.new_scope();
    let anonymous = Credential::anonymous();

    scope.begin().unwrap();
    let a = site
        .env
        .allocate_as("orders", &scope, &anonymous, &ConnectionRequest::new().with("schema", "a"))
        .unwrap();
    let b = site
        .env
        .allocate_as("orders", &scope, &anonymous, &ConnectionRequest::new().with("schema", "b"))
        .unwrap();
    assert_ne!(physical(&a), physical(&b));
    a.close();
    b.close();
    scope.rollback().unwrap();
}

/// Without a transaction every allocation gets its own connection
#[test]
fn no_sharing_outside_transaction() {
    let site = SiteBuilder::new().pool(PoolConfig::new("orders")).build();
    let pool = Arc::clone(site.env.pool("orders").unwrap());
    let anonymous = Credential::anonymous();

    let a = pool.allocate(None, &anonymous, &ConnectionRequest::new()).unwrap();
    let b = pool.allocate(None, &anonymous, &ConnectionRequest::new()).unwrap();
    assert_ne!(physical(&a), physical(&b));

    let scope = site.env.new_scope();
    let c = site.allocate("orders", &scope);
    let d = site.allocate("orders", &scope);
    assert_ne!(physical(&c), physical(&d));
    for handle in [a, b, c, d] {
        handle.close();
    }
    assert_eq!(pool.idle_count(), 4);
}

/// A non-shareable pool hands each open handle its own connection
#[test]
fn unshareable_pool_opens_one_connection_per_handle() {
    let site = SiteBuilder::new()
        .pool(PoolConfig::new("orders").shareable(false))
        .build();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    let a = site.allocate("orders", &scope);
    let b = site.allocate("orders", &scope);
    assert_ne!(physical(&a), physical(&b));
    assert_eq!(site.factory("orders").created_count(), 2);

    a.close();
    b.close();
    scope.commit().unwrap();
    assert_eq!(site.env.pool("orders").unwrap().idle_count(), 2);
}

/// After commit the sharing ends: each handle keeps a private connection
#[test]
fn shared_handles_split_after_commit() {
    let site = SiteBuilder::new().pool(PoolConfig::new("orders")).build();
    let scope = site.env.new_scope();

    scope.begin().unwrap();
    let a = site.allocate("orders", &scope);
    let b = site.allocate("orders", &scope);
    assert_eq!(physical(&a), physical(&b));
    scope.commit().unwrap();

    assert_ne!(physical(&a), physical(&b));
    a.close();
    b.close();
    assert_eq!(site.env.pool("orders").unwrap().idle_count(), 2);
}
