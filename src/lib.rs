//! # xapool
//!
//! Two-phase-commit transaction coordination with an XA-aware connection
//! pool.
//!
//! A [`TransactionEnvironment`] owns one transaction manager and a set of
//! named connection pools. Work runs inside a [`TransactionScope`]:
//! connections checked out through the scope are enlisted in its
//! transaction, and `commit` drives prepare/commit across every resource
//! manager touched. A single participant commits in one phase, through the
//! driver's local transaction when possible.
//!
//! ## Quick Start
//!
//! ```ignore
//! use xapool::prelude::*;
//!
//! let env = TransactionEnvironment::builder()
//!     .config(XapoolConfig::load("xapool.toml")?)
//!     .factory("orders", orders_factory)
//!     .build()?;
//! env.start()?;
//!
//! let scope = env.new_scope();
//! scope.begin()?;
//! let handle = env.allocate("orders", &scope)?;
//! // ... handle.connection()? ...
//! handle.close();
//! scope.commit()?;
//! ```
//!
//! ## Crates
//!
//! - `xapool-core`: ids, flags, status, errors, driver traits
//! - `xapool-durability`: commit-decision logs
//! - `xapool-coordinator`: transaction manager and coordinator
//! - `xapool-pool`: pools, pooled participants, scopes

#![warn(missing_docs)]

pub mod config;
pub mod current;
pub mod environment;
pub mod prelude;

pub use config::XapoolConfig;
pub use current::{bind_current_scope, current_scope, unbind_current_scope, with_scope};
pub use environment::{EnvironmentBuilder, StartReport, TransactionEnvironment};

pub use xapool_coordinator::{TransactionConfig, TransactionCoordinator, TransactionManager};
pub use xapool_core::{Error, Result, TransactionId, TransactionStatus};
pub use xapool_durability::{FileXaLog, MemoryXaLog};
pub use xapool_pool::{ConnectionPool, PoolConfig, ResourceHandle, TransactionScope};
