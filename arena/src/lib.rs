//! Orchestration engine for competing agent attempts.
//!
//! A job fans out into several independent agent runs on a remote execution
//! backend. Each run pushes to its own branch, which a code host builds and
//! deploys. The engine reconciles both pipelines into one status per agent
//! and decides when enough attempts have concluded for a human to pick a
//! winner. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (status mapping, merge,
//!   termination policy, naming). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (job store, execution backend, code
//!   host, deployment host, config). Behind traits to enable fakes in tests.
//!
//! Orchestration modules ([`spawn`], [`monitor`], [`orchestrator`]) coordinate
//! core logic with I/O.

pub mod core;
pub mod error;
pub mod events;
pub mod io;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod spawn;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
