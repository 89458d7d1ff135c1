//! Durability layer for xapool
//!
//! This crate implements the optional commit-decision log:
//! - XaLogRecord: Commit and Finish records
//! - Frame encoding/decoding with CRC32 checksums
//! - MemoryXaLog: in-process log for tests and embedded use
//! - FileXaLog: append-only file, fsync on commit decisions, replay on open

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod file;
pub mod memory;
pub mod record;

pub use file::FileXaLog;
pub use memory::MemoryXaLog;
pub use record::{decode_record, encode_record, LogError, XaLogRecord};
