//! Transaction Integration Tests
//!
//! Commit protocol, rollback, heuristic outcomes, timeouts and recovery,
//! driven through pooled connections.

#[path = "../common/mod.rs"]
mod common;

mod heuristics;
mod recovery;
mod rollback;
mod timeout;
mod two_phase;
