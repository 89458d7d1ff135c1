//! Transactional connection pooling for xapool
//!
//! This crate pools physical connections and plugs them into the
//! coordinator:
//! - ConnectionPool: bounded allocation with idle reuse, waits and overflow
//! - PooledResource: a pooled connection acting as a 2PC participant
//! - ResourceHandle: the caller's lease, re-resolved after each transaction
//! - TransactionScope: per-unit-of-work transaction context
//! - PoolReaper: background eviction of expired connections

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod handle;
pub mod idle;
pub mod pool;
pub mod reaper;
pub mod resource;
pub mod scope;

pub use config::PoolConfig;
pub use handle::ResourceHandle;
pub use idle::{IdleCursor, IdlePool};
pub use pool::{ConnectionPool, PoolStats};
pub use reaper::{reap_period, PoolReaper};
pub use resource::PooledResource;
pub use scope::{SuspendedTransaction, TransactionScope};
