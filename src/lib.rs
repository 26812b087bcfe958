//! Bounded-concurrency task dispatcher on top of Tokio
//!
//! # Features
//! - FIFO task queue, optionally bounded
//! - At most `max_workers` handler invocations in flight, each item processed once
//! - Graceful shutdown: stop intake, drain, stop; abandoned items counted on timeout
//! - Handler errors and panics isolated per item
//! - Structured events through an injected observer, metrics and monitoring

pub mod dispatcher;
pub mod errors;
pub mod handler;
pub mod model;
pub mod observer;
pub mod queue;

pub use dispatcher::{Config, Dispatcher, SharedDispatcher};
pub use errors::{DispatchError, DispatchResult};
pub use handler::{blocking_fn, handler_fn, BoxError, Handler, LoggingHandler};
pub use model::{DispatcherMetrics, ShutdownReport, State, TaskId};
pub use observer::{DispatchEvent, Observer, TracingObserver};
pub use queue::TaskQueue;
