//! Deterministic, pure logic shared by the arena core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod dashboard;
pub mod merge;
pub mod naming;
pub mod status_map;
pub mod termination;
pub mod types;
