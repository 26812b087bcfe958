use super::model::{State, TaskId};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dispatcher is {state}, item rejected")]
    Rejected { state: State },

    #[error("queue is full ({capacity} pending), item rejected")]
    QueueFull { capacity: usize },

    #[error("handler failed on {task}: {message}")]
    Handler { task: TaskId, message: String },

    #[error("handler panicked on {task}: {message}")]
    Panic { task: TaskId, message: String },

    #[error(
        "shutdown timed out after {timeout:?}: {abandoned} queued items abandoned, {in_flight} still in flight"
    )]
    ShutdownTimeout {
        timeout: Duration,
        abandoned: usize,
        in_flight: usize,
    },

    /// The drain task never reported back, e.g. its runtime shut down first.
    #[error("shutdown aborted: {0}")]
    ShutdownAborted(String),
}

impl DispatchError {
    /// True for submit-time refusals (`Rejected`, `QueueFull`).
    #[inline]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::QueueFull { .. })
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
