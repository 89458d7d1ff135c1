//! Append-only file transaction log
//!
//! Records are framed as described in [`crate::record`]. Commit decisions
//! are fsynced before `write_commit` returns; finish records are only
//! flushed, since losing one merely causes a redundant recovery commit.
//!
//! On open, the file is replayed to rebuild the in-doubt set. A torn or
//! corrupt tail (crash mid-append) is truncated away with a warning.
//!
//! A failed append is cut back to the last intact frame before the error is
//! returned, so a later append never lands behind a partial frame. If the
//! cut itself fails, the log refuses every further append.

use crate::record::{decode_record, encode_record, in_doubt, LogError, XaLogRecord};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use xapool_core::{Result, TransactionId, XaLog};

/// Transaction log backed by a single append-only file
///
/// # Thread Safety
///
/// Appends are serialized by an internal mutex, so one log can be shared
/// by every coordinator of a process.
#[derive(Debug)]
pub struct FileXaLog {
    path: PathBuf,
    inner: Mutex<FileLogState>,
}

#[derive(Debug)]
struct FileLogState {
    file: File,
    /// Length of the intact prefix
    len: u64,
    unusable: bool,
    pending: Vec<TransactionId>,
    records_written: u64,
    #[cfg(test)]
    short_write: Option<usize>,
}

impl FileXaLog {
    /// Open or create the log at `path`, replaying existing records
    pub fn open(path: impl AsRef<Path>) -> std::result::Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let (records, valid_len) = replay(&buf);
        if valid_len < buf.len() {
            warn!(
                path = %path.display(),
                valid_len,
                file_len = buf.len(),
                "truncating damaged transaction log tail"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        let pending = in_doubt(&records);
        debug!(
            path = %path.display(),
            records = records.len(),
            in_doubt = pending.len(),
            "opened transaction log"
        );

        Ok(FileXaLog {
            path,
            inner: Mutex::new(FileLogState {
                file,
                len: valid_len as u64,
                unusable: false,
                pending,
                records_written: records.len() as u64,
                #[cfg(test)]
                short_write: None,
            }),
        })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records in the file, including those replayed on open
    pub fn records_written(&self) -> u64 {
        self.inner.lock().records_written
    }

    fn append(&self, record: &XaLogRecord, durable: bool) -> std::result::Result<(), LogError> {
        let frame = encode_record(record)?;
        let mut state = self.inner.lock();
        if state.unusable {
            return Err(LogError::Unusable { offset: state.len });
        }

        if let Err(e) = write_frame(&mut state, &frame, durable) {
            let intact = state.len;
            match state.file.set_len(intact) {
                Ok(()) => warn!(
                    path = %self.path.display(),
                    offset = intact,
                    error = %e,
                    "append failed, partial frame removed"
                ),
                Err(cut) => {
                    error!(
                        path = %self.path.display(),
                        offset = intact,
                        error = %cut,
                        "cannot remove partial frame, log disabled"
                    );
                    state.unusable = true;
                }
            }
            return Err(e.into());
        }
        state.len += frame.len() as u64;
        state.records_written += 1;

        match record {
            XaLogRecord::Commit { xid, .. } => {
                if !state.pending.contains(xid) {
                    state.pending.push(xid.clone());
                }
            }
            XaLogRecord::Finish { xid, .. } => state.pending.retain(|p| p != xid),
        }
        Ok(())
    }
}

fn write_frame(state: &mut FileLogState, frame: &[u8], durable: bool) -> io::Result<()> {
    #[cfg(test)]
    {
        if let Some(limit) = state.short_write.take() {
            state.file.write_all(&frame[..limit.min(frame.len())])?;
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short write"));
        }
    }

    state.file.write_all(frame)?;
    if durable {
        state.file.sync_data()
    } else {
        state.file.flush()
    }
}

/// Decode every intact frame; returns the records and the length of the
/// intact prefix
fn replay(buf: &[u8]) -> (Vec<XaLogRecord>, usize) {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        match decode_record(buf, offset) {
            Ok((record, next)) => {
                records.push(record);
                offset = next;
            }
            Err(e) => {
                warn!(error = %e, "transaction log replay stopped");
                break;
            }
        }
    }
    (records, offset)
}

impl XaLog for FileXaLog {
    fn write_commit(&self, xid: &TransactionId) -> Result<()> {
        self.append(&XaLogRecord::commit(xid.clone()), true)?;
        Ok(())
    }

    fn write_finish(&self, xid: &TransactionId) -> Result<()> {
        self.append(&XaLogRecord::finish(xid.clone()), false)?;
        Ok(())
    }

    fn in_doubt(&self) -> Result<Vec<TransactionId>> {
        Ok(self.inner.lock().pending.clone())
    }
}
