//! Transaction status

use serde::{Deserialize, Serialize};

/// Status of a transaction coordinator
///
/// ```text
/// NoTransaction -> Active -> [MarkedRollbackOnly] -> Preparing -> Committing -> Committed
///                                    |                   |
///                                    +-----> RollingBack -> RolledBack
/// ```
///
/// Both terminal states return to `NoTransaction` once the completion
/// callbacks have run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// No transaction is associated
    NoTransaction,
    /// Transaction is running and may enlist resources
    Active,
    /// Transaction can only be rolled back
    MarkedRollbackOnly,
    /// Prepare round in progress
    Preparing,
    /// Commit round in progress
    Committing,
    /// Rollback in progress
    RollingBack,
    /// Transaction committed
    Committed,
    /// Transaction rolled back
    RolledBack,
}

impl TransactionStatus {
    /// True for `Committed` and `RolledBack`
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack
        )
    }

    /// True while completion may still be requested
    pub fn can_complete(self) -> bool {
        matches!(
            self,
            TransactionStatus::Active | TransactionStatus::MarkedRollbackOnly
        )
    }
}

impl Default for TransactionStatus {
    fn default() -> Self {
        TransactionStatus::NoTransaction
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionStatus::NoTransaction => "NO_TRANSACTION",
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::MarkedRollbackOnly => "MARKED_ROLLBACK",
            TransactionStatus::Preparing => "PREPARING",
            TransactionStatus::Committing => "COMMITTING",
            TransactionStatus::RollingBack => "ROLLING_BACK",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::RolledBack => "ROLLEDBACK",
        };
        f.write_str(name)
    }
}
