//! In-process transaction log

use crate::record::{in_doubt, XaLogRecord};
use parking_lot::Mutex;
use xapool_core::{Result, TransactionId, XaLog};

/// Transaction log kept in memory
///
/// Nothing survives the process, so this log only helps recovery of
/// resources within the same process. Useful for tests and embedded use,
/// where the record sequence can be inspected afterwards.
#[derive(Debug, Default)]
pub struct MemoryXaLog {
    records: Mutex<Vec<XaLogRecord>>,
}

impl MemoryXaLog {
    /// Create an empty log
    pub fn new() -> Self {
        MemoryXaLog::default()
    }

    /// Snapshot of every record written so far
    pub fn records(&self) -> Vec<XaLogRecord> {
        self.records.lock().clone()
    }

    /// Number of records written
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl XaLog for MemoryXaLog {
    fn write_commit(&self, xid: &TransactionId) -> Result<()> {
        self.records.lock().push(XaLogRecord::commit(xid.clone()));
        Ok(())
    }

    fn write_finish(&self, xid: &TransactionId) -> Result<()> {
        self.records.lock().push(XaLogRecord::finish(xid.clone()));
        Ok(())
    }

    fn in_doubt(&self) -> Result<Vec<TransactionId>> {
        Ok(in_doubt(self.records.lock().iter()))
    }
}
