//! Single-slot delayed task for the supervisor worker.
//!
//! At most one of {health check, reconnect attempt} is pending at a time.
//! Scheduling replaces the pending task; cancelling drops it. The worker
//! awaits [`Scheduler::next`] inside `select!`, so a cancelled task can
//! never fire.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    HealthCheck,
    /// Zero-based attempt number.
    Reconnect { attempt: u32 },
}

#[derive(Debug, Default)]
pub struct Scheduler {
    pending: Option<(Instant, Task)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing anything already pending.
    pub fn schedule(&mut self, task: Task, delay: Duration) {
        self.pending = Some((Instant::now() + delay, task));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn pending(&self) -> Option<Task> {
        self.pending.map(|(_, task)| task)
    }

    /// Wait for the pending task to come due and take it. Never resolves
    /// while nothing is pending. Cancel-safe: the task is only taken once
    /// its deadline has passed.
    pub async fn next(&mut self) -> Task {
        match self.pending {
            None => std::future::pending().await,
            Some((deadline, _)) => {
                tokio::time::sleep_until(deadline).await;
                match self.pending.take() {
                    Some((_, task)) => task,
                    None => std::future::pending().await,
                }
            }
        }
    }
}

/// Backoff before reconnect attempt `attempt` (zero-based): doubles up to
/// eight times the base delay.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt.min(3))
}
