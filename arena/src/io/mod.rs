//! I/O adapters for arena operations.

pub mod clock;
pub mod code_host;
pub mod config;
pub mod execution;
pub mod http;
pub mod preview;
pub mod prompt;
pub mod store;
