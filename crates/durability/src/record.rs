//! Transaction log records and their on-disk framing
//!
//! ## Frame Layout
//!
//! ```text
//! +-----------+-----------+---------------------+
//! | length    | crc32     | bincode payload     |
//! | u32 (LE)  | u32 (LE)  | `length` bytes      |
//! +-----------+-----------+---------------------+
//! ```
//!
//! The checksum covers the payload only. A frame that is cut short or
//! fails its checksum ends replay; everything after it is discarded.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use xapool_core::TransactionId;

/// Size of the frame header (length + checksum)
pub const FRAME_HEADER_LEN: usize = 8;

/// Upper bound on a single record payload
///
/// Anything larger is treated as corruption rather than allocated.
pub const MAX_RECORD_LEN: usize = 64 * 1024;

/// Transaction log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum XaLogRecord {
    /// The coordinator decided to commit
    ///
    /// Written after every participant voted and before the first commit
    /// call.
    Commit {
        /// Root id of the transaction
        xid: TransactionId,
        /// When the decision was recorded
        timestamp: DateTime<Utc>,
    },

    /// Every participant has completed
    Finish {
        /// Root id of the transaction
        xid: TransactionId,
        /// When completion was recorded
        timestamp: DateTime<Utc>,
    },
}

impl XaLogRecord {
    /// Commit-decision record stamped with the current time
    pub fn commit(xid: TransactionId) -> Self {
        XaLogRecord::Commit {
            xid,
            timestamp: Utc::now(),
        }
    }

    /// Finish record stamped with the current time
    pub fn finish(xid: TransactionId) -> Self {
        XaLogRecord::Finish {
            xid,
            timestamp: Utc::now(),
        }
    }

    /// Transaction the record refers to
    pub fn xid(&self) -> &TransactionId {
        match self {
            XaLogRecord::Commit { xid, .. } | XaLogRecord::Finish { xid, .. } => xid,
        }
    }

    /// True for commit-decision records
    pub fn is_commit(&self) -> bool {
        matches!(self, XaLogRecord::Commit { .. })
    }
}

/// Failure reading or writing the log
#[derive(Debug, Error)]
pub enum LogError {
    /// Underlying file error
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized
    #[error("failed to encode log record: {0}")]
    Encode(#[from] bincode::Error),

    /// Frame is cut short
    #[error("incomplete frame at offset {offset}")]
    Incomplete {
        /// Offset of the frame
        offset: usize,
    },

    /// Frame failed validation
    #[error("corrupt frame at offset {offset}: {reason}")]
    Corrupt {
        /// Offset of the frame
        offset: usize,
        /// What failed
        reason: String,
    },

    /// A failed append could not be cut back; the file refuses further writes
    #[error("log unusable: partial frame at offset {offset} could not be removed")]
    Unusable {
        /// Length of the intact prefix
        offset: u64,
    },
}

impl From<LogError> for xapool_core::Error {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Io(io) => xapool_core::Error::Io(io),
            other => xapool_core::Error::Log(other.to_string()),
        }
    }
}

/// Encode a record into one frame
pub fn encode_record(record: &XaLogRecord) -> Result<Vec<u8>, LogError> {
    let payload = bincode::serialize(record)?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(LogError::Corrupt {
            offset: 0,
            reason: format!("record of {} bytes exceeds limit", payload.len()),
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.write_u32::<LittleEndian>(payload.len() as u32)?;
    frame.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode the frame starting at `offset`
///
/// Returns the record and the offset of the next frame.
pub fn decode_record(buf: &[u8], offset: usize) -> Result<(XaLogRecord, usize), LogError> {
    let rest = &buf[offset.min(buf.len())..];
    if rest.len() < FRAME_HEADER_LEN {
        return Err(LogError::Incomplete { offset });
    }

    let len = LittleEndian::read_u32(&rest[0..4]) as usize;
    let crc = LittleEndian::read_u32(&rest[4..8]);
    if len > MAX_RECORD_LEN {
        return Err(LogError::Corrupt {
            offset,
            reason: format!("length {} exceeds limit", len),
        });
    }
    if rest.len() < FRAME_HEADER_LEN + len {
        return Err(LogError::Incomplete { offset });
    }

    let payload = &rest[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len];
    if crc32fast::hash(payload) != crc {
        return Err(LogError::Corrupt {
            offset,
            reason: "checksum mismatch".to_string(),
        });
    }

    let record = bincode::deserialize(payload).map_err(|e| LogError::Corrupt {
        offset,
        reason: e.to_string(),
    })?;
    Ok((record, offset + FRAME_HEADER_LEN + len))
}

/// Transactions with a commit record and no later finish record, in
/// decision order
pub fn in_doubt<'a>(records: impl IntoIterator<Item = &'a XaLogRecord>) -> Vec<TransactionId> {
    let mut pending: Vec<TransactionId> = Vec::new();
    for record in records {
        match record {
            XaLogRecord::Commit { xid, .. } => {
                if !pending.contains(xid) {
                    pending.push(xid.clone());
                }
            }
            XaLogRecord::Finish { xid, .. } => pending.retain(|p| p != xid),
        }
    }
    pending
}
