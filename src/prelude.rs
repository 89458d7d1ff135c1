//! Convenient imports for xapool.
//!
//! ```ignore
//! use xapool::prelude::*;
//!
//! let env = TransactionEnvironment::builder().build()?;
//! let scope = env.new_scope();
//! ```

// Entry points
pub use crate::config::XapoolConfig;
pub use crate::environment::{EnvironmentBuilder, TransactionEnvironment};

// Scopes and pools
pub use xapool_pool::{ConnectionPool, PoolConfig, ResourceHandle, TransactionScope};

// Transactions
pub use xapool_coordinator::TransactionConfig;
pub use xapool_core::{TransactionId, TransactionStatus};

// Driver traits
pub use xapool_core::{
    ConnectionRequest, Credential, LocalTransaction, ManagedConnection, ManagedConnectionFactory,
    Synchronization, XaResource,
};

// Error handling
pub use xapool_core::{Error, Result};
