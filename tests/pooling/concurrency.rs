//! Contention: exclusive connections and unique ids

use crate::common::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use xapool::{PoolConfig, TransactionConfig, TransactionManager};
use xapool_core::ConnectionRequest;
use xapool_testkit::user_connection;

const THREADS: usize = 8;
const ROUNDS: usize = 25;

fn contended(max: usize) -> Arc<Site> {
    Arc::new(
        SiteBuilder::new()
            .pool(
                PoolConfig::new("orders")
                    .max_connections(max)
                    .max_overflow_connections(0)
                    .connection_wait_time(Duration::from_secs(30)),
            )
            .build(),
    )
}

// ============================================================================
// Exclusive ownership
// ============================================================================

/// One physical connection, many transactions: never two at once
#[test]
fn single_connection_serializes_transactions() {
    let site = contended(1);
    let busy = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let (site, busy, barrier) = (site.clone(), busy.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let scope = site.env.new_scope();
                    scope.begin().unwrap();
                    let handle = site.allocate("orders", &scope);
                    assert!(!busy.swap(true, Ordering::SeqCst), "connection shared");
                    thread::yield_now();
                    busy.store(false, Ordering::SeqCst);
                    handle.close();
                    scope.commit().unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let factory = site.factory("orders");
    assert_eq!(factory.created_count(), 1);
    let conn = factory.connection(1).unwrap();
    assert_eq!(conn.local().unwrap().commit_count(), THREADS * ROUNDS);
    assert_eq!(site.env.pool("orders").unwrap().idle_count(), 1);
}

/// Outside transactions, every checked-out physical connection has exactly
/// one user and the pool never exceeds its size
#[test]
fn checked_out_connections_are_exclusive() {
    let site = contended(3);
    let in_use = Arc::new(Mutex::new(HashSet::new()));
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let (site, in_use, barrier) = (site.clone(), in_use.clone(), barrier.clone());
            thread::spawn(move || {
                let pool = Arc::clone(site.env.pool("orders").unwrap());
                barrier.wait();
                for _ in 0..ROUNDS {
                    let handle = pool
                        .allocate(None, &Credential::anonymous(), &ConnectionRequest::new())
                        .unwrap();
                    let id = user_connection(&handle.connection().unwrap())
                        .unwrap()
                        .physical_id();
                    assert!(in_use.lock().insert(id), "connection {} handed out twice", id);
                    thread::yield_now();
                    in_use.lock().remove(&id);
                    handle.close();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let pool = site.env.pool("orders").unwrap();
    assert!(site.factory("orders").created_count() <= 3);
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.wait_count(), 0);
    assert_eq!(pool.stats().allocations as usize, THREADS * ROUNDS);
}

// ============================================================================
// Id uniqueness
// ============================================================================

#[test]
fn transaction_ids_unique_across_threads() {
    let manager = Arc::new(TransactionManager::new(&TransactionConfig::default()));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || (0..500).map(|_| manager.create_xid()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = HashSet::new();
    for worker in workers {
        for xid in worker.join().unwrap() {
            assert!(seen.insert(xid));
        }
    }
    assert_eq!(seen.len(), THREADS * 500);
}

/// Two managers with the same server id, as after a restart, never mint the
/// same id
#[test]
fn restarted_manager_mints_fresh_ids() {
    let config = TransactionConfig::new().server_id(3);
    let before = TransactionManager::new(&config);
    let after = TransactionManager::new(&config);

    let first: HashSet<_> = (0..100).map(|_| before.create_xid()).collect();
    assert!((0..100).all(|_| !first.contains(&after.create_xid())));
}

#[test]
fn concurrent_scopes_get_distinct_transactions() {
    let site = contended(THREADS);
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let (site, barrier) = (site.clone(), barrier.clone());
            thread::spawn(move || {
                let scope = site.env.new_scope();
                barrier.wait();
                scope.begin().unwrap();
                let xid = scope.xid().unwrap();
                site.allocate("orders", &scope).close();
                scope.commit().unwrap();
                xid
            })
        })
        .collect();

    let xids: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    for (i, a) in xids.iter().enumerate() {
        for b in &xids[i + 1..] {
            assert!(!a.same_transaction(b));
        }
    }
}
