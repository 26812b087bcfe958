//! Handler capability invoked once per dispatched item.

use std::{error::Error, fmt::Debug, future::Future, sync::Arc, time::Duration};

pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Processes a single item.
///
/// The dispatcher calls `process` from several workers at once (on different
/// items), so implementations must be safe for concurrent use. An `Err` or a
/// panic fails only that item.
pub trait Handler<T>: Send + Sync + 'static {
    fn process(&self, item: T) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// Handler backed by an async closure. See [`handler_fn`].
pub struct FnHandler<F>(F);

pub fn handler_fn<T, F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), BoxError>>,
{
    FnHandler(f)
}

impl<T, F, Fut> Handler<T> for FnHandler<F>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    #[inline]
    fn process(&self, item: T) -> impl Future<Output = Result<(), BoxError>> + Send {
        (self.0)(item)
    }
}

/// Handler backed by a synchronous closure run on Tokio's blocking pool.
/// See [`blocking_fn`].
pub struct BlockingHandler<F>(Arc<F>);

pub fn blocking_fn<T, F>(f: F) -> BlockingHandler<F>
where
    F: Fn(T) -> Result<(), BoxError>,
{
    BlockingHandler(Arc::new(f))
}

impl<T, F> Handler<T> for BlockingHandler<F>
where
    T: Send + 'static,
    F: Fn(T) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn process(&self, item: T) -> impl Future<Output = Result<(), BoxError>> + Send {
        let f = Arc::clone(&self.0);
        async move {
            match tokio::task::spawn_blocking(move || f(item)).await {
                Ok(result) => result,
                // re-raise so the worker boundary reports it as a panic
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic())
                }
                Err(join_err) => Err(join_err.into()),
            }
        }
    }
}

/// Logs each item and sleeps for a fixed delay.
#[derive(Debug, Clone)]
pub struct LoggingHandler {
    delay: Duration,
}

impl LoggingHandler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl<T> Handler<T> for LoggingHandler
where
    T: Debug + Send + 'static,
{
    fn process(&self, item: T) -> impl Future<Output = Result<(), BoxError>> + Send {
        let delay = self.delay;
        async move {
            tracing::info!(?item, ?delay, "processing request");
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}
