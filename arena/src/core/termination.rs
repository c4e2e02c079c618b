//! Convergence decision for a monitored job.
//!
//! A job converges when a usable result exists (or every attempt failed) and
//! either all attempts are done, the absolute ceiling has passed, or a
//! majority is done and nobody else has finished for the idle window.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::core::types::{Agent, AgentStatus};

pub const DEFAULT_MAJORITY_FRACTION: f64 = 0.5;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30 * 60);

/// Why a job converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceReason {
    AllTerminal,
    MaxWait,
    IdleAfterMajority,
}

/// Aggregate agent state plus timing for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub total: usize,
    pub terminal: usize,
    pub ready: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub last_finished_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    pub fn from_agents(
        agents: &[Agent],
        started_at: DateTime<Utc>,
        last_finished_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut progress = JobProgress {
            total: agents.len(),
            terminal: 0,
            ready: 0,
            failed: 0,
            started_at,
            last_finished_at,
        };
        for agent in agents {
            if agent.status.is_terminal() {
                progress.terminal += 1;
            }
            if agent.status.is_failure() {
                progress.failed += 1;
            }
            if agent.status == AgentStatus::Ready {
                progress.ready += 1;
            }
        }
        progress
    }

    fn all_terminal(&self) -> bool {
        self.terminal == self.total
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminationPolicy {
    pub majority_fraction: f64,
    pub idle_timeout: Duration,
    pub max_wait: Duration,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            majority_fraction: DEFAULT_MAJORITY_FRACTION,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl TerminationPolicy {
    /// Minimum number of terminal agents that counts as a majority.
    pub fn majority_threshold(&self, total: usize) -> usize {
        (total as f64 * self.majority_fraction).ceil() as usize
    }

    /// Decide whether the job should stop being monitored.
    pub fn evaluate(&self, progress: &JobProgress, now: DateTime<Utc>) -> Option<ConvergenceReason> {
        let all_failed = progress.all_terminal() && progress.failed == progress.total;
        let can_transition = progress.ready > 0 || all_failed;
        if !can_transition {
            return None;
        }

        if progress.all_terminal() {
            return Some(ConvergenceReason::AllTerminal);
        }
        if elapsed(progress.started_at, now) >= self.max_wait {
            return Some(ConvergenceReason::MaxWait);
        }
        let majority_reached = progress.terminal >= self.majority_threshold(progress.total);
        if majority_reached
            && let Some(last) = progress.last_finished_at
            && elapsed(last, now) >= self.idle_timeout
        {
            return Some(ConvergenceReason::IdleAfterMajority);
        }
        None
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
