//! Deterministic naming for agents and their branches.
//!
//! Names are a pure function of `(job id, ordinal)`, so re-deriving the branch
//! for agent `k` always yields the same string and lookups against the code
//! host stay idempotent.

const BRANCH_PREFIX: &str = "arena";

/// Stable agent label within a job. Ordinals start at 1.
pub fn agent_id(ordinal: u32) -> String {
    format!("agent-{ordinal}")
}

/// Branch an agent pushes its solution to.
pub fn branch_name(job_id: &str, ordinal: u32) -> String {
    format!("{BRANCH_PREFIX}/{job_id}/{}", agent_id(ordinal))
}
