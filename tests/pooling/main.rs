//! Pooling Integration Tests
//!
//! Exclusive ownership under contention, sharing rules, idle lifecycle,
//! id uniqueness and environment wiring.

#[path = "../common/mod.rs"]
mod common;

mod concurrency;
mod environment;
mod lifecycle;
mod sharing;
