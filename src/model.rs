use std::{fmt, time::Duration};

/// Lifecycle of a dispatcher. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Running => "running",
            State::ShuttingDown => "shutting down",
            State::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Submission token handed out for every accepted item, in submit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherMetrics {
    pub state: State,
    pub max_workers: usize,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub queued_tasks: usize,
    pub accepted_tasks: usize,
    pub rejected_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub abandoned_tasks: usize,
}

impl DispatcherMetrics {
    pub fn utilization(&self) -> f64 {
        if self.max_workers == 0 {
            return 0.0;
        }
        self.active_workers.min(self.max_workers) as f64 / self.max_workers as f64
    }

    /// Queued items per worker slot.
    pub fn queue_pressure(&self) -> f64 {
        if self.max_workers == 0 {
            return 0.0;
        }
        self.queued_tasks as f64 / self.max_workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}

/// Outcome of a shutdown that drained in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: usize,
    pub failed: usize,
    pub elapsed: Duration,
}
