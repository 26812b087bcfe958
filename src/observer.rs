//! Structured dispatcher events and the sink they are reported to.
//!
//! The dispatcher never logs directly; it hands every event to the
//! [`Observer`] it was built with. [`TracingObserver`] forwards them to
//! `tracing`.

use super::{errors::DispatchError, model::TaskId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Accepted {
        task: TaskId,
        queued: usize,
    },
    Rejected {
        error: DispatchError,
    },
    Started {
        task: TaskId,
        queue_wait: Duration,
    },
    Completed {
        task: TaskId,
        elapsed: Duration,
    },
    Failed {
        task: TaskId,
        error: DispatchError,
        elapsed: Duration,
    },
    ShutdownRequested {
        queued: usize,
        in_flight: usize,
    },
    ShutdownCompleted {
        completed: usize,
        failed: usize,
        elapsed: Duration,
    },
    ShutdownTimedOut {
        abandoned: usize,
        in_flight: usize,
    },
}

/// Receives dispatcher events. Called inline on submitting and worker tasks,
/// so implementations should return quickly.
pub trait Observer: Send + Sync + 'static {
    fn on_event(&self, event: &DispatchEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Accepted { task, queued } => {
                info!(task = %task, queued, "request accepted");
            }
            DispatchEvent::Rejected { error } => {
                warn!(%error, "request rejected");
            }
            DispatchEvent::Started { task, queue_wait } => {
                debug!(task = %task, ?queue_wait, "request processing started");
            }
            DispatchEvent::Completed { task, elapsed } => {
                debug!(task = %task, ?elapsed, "request processed");
            }
            DispatchEvent::Failed {
                task,
                error,
                elapsed,
            } => {
                error!(task = %task, %error, ?elapsed, "request failed");
            }
            DispatchEvent::ShutdownRequested { queued, in_flight } => {
                info!(queued, in_flight, "shutdown requested, draining");
            }
            DispatchEvent::ShutdownCompleted {
                completed,
                failed,
                elapsed,
            } => {
                info!(completed, failed, ?elapsed, "shutdown complete");
            }
            DispatchEvent::ShutdownTimedOut {
                abandoned,
                in_flight,
            } => {
                error!(abandoned, in_flight, "shutdown timed out");
            }
        }
    }
}
