//! Environment wiring from configuration, and the thread-bound scope

use crate::common::*;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use xapool::{
    bind_current_scope, current_scope, unbind_current_scope, with_scope, TransactionEnvironment,
    XapoolConfig,
};
use xapool_testkit::MockFactory;

const CONFIG: &str = r#"
    [transaction]
    server_id = 11

    [[pools]]
    name = "orders"
    max_connections = 4
    local_transaction_optimization = false

    [[pools]]
    name = "inventory"
    max_connections = 2
    local_transaction_optimization = false
"#;

#[test]
fn environment_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("xapool.toml");
    std::fs::write(&path, CONFIG).unwrap();

    let orders = Arc::new(MockFactory::new("orders"));
    let inventory = Arc::new(MockFactory::new("inventory"));
    let env = TransactionEnvironment::builder()
        .config(XapoolConfig::load(&path).unwrap())
        .factory("orders", orders.clone())
        .factory("inventory", inventory.clone())
        .build()
        .unwrap();

    assert_eq!(env.manager().server_id(), 11);
    assert_eq!(env.pool("inventory").unwrap().config().max_connections, 2);
    env.start().unwrap();

    let scope = env.new_scope();
    scope.begin().unwrap();
    assert!(scope.xid().unwrap().is_local_format(11));
    env.allocate("orders", &scope).unwrap().close();
    env.allocate("inventory", &scope).unwrap().close();
    scope.commit().unwrap();

    // connection 1 of each factory served the recovery scan
    for factory in [&orders, &inventory] {
        let xa = factory.connection(2).unwrap().xa().unwrap().clone();
        assert_eq!(xa.commit_count(), 1);
    }
    env.close();
}

#[test]
fn missing_factory_is_a_config_error() {
    let err = TransactionEnvironment::builder()
        .config(XapoolConfig::from_toml_str(CONFIG).unwrap())
        .factory("orders", Arc::new(MockFactory::new("orders")))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Config(msg) if msg.contains("inventory")));
}

// ============================================================================
// Thread-bound scope
// ============================================================================

/// The process-wide environment hands each thread its own scope
#[test]
fn global_environment_scopes_are_per_thread() {
    let env = TransactionEnvironment::builder()
        .pool(
            xapool::PoolConfig::new("orders"),
            Arc::new(MockFactory::new("orders")),
        )
        .build()
        .unwrap();
    xapool::current::install_global(Arc::new(env)).unwrap();
    let env = xapool::current::global().unwrap();

    let mine = current_scope().unwrap();
    assert!(Arc::ptr_eq(&mine, &current_scope().unwrap()));
    assert!(mine.in_context());

    let theirs = thread::spawn(|| {
        let scope = current_scope().unwrap();
        scope.begin().unwrap();
        let xid = scope.xid().unwrap();
        scope.rollback().unwrap();
        xid
    })
    .join()
    .unwrap();

    mine.begin().unwrap();
    assert!(!mine.xid().unwrap().same_transaction(&theirs));
    env.allocate("orders", &mine).unwrap().close();
    mine.commit().unwrap();

    let replacement = env.new_scope();
    with_scope(Arc::clone(&replacement), || {
        assert!(Arc::ptr_eq(&current_scope().unwrap(), &replacement));
    });
    assert!(Arc::ptr_eq(&current_scope().unwrap(), &mine));
    assert!(unbind_current_scope().is_some());

    let bound = env.new_scope();
    assert!(bind_current_scope(Arc::clone(&bound)).is_none());
    assert!(unbind_current_scope().is_some());
    assert!(!bound.in_context());
}
