use super::{
    errors::{DispatchError, DispatchResult},
    handler::Handler,
    model::{DispatcherMetrics, ShutdownReport, State, TaskId},
    observer::{DispatchEvent, Observer, TracingObserver},
    queue::TaskQueue,
};
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{fence, AtomicU64, AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use tokio::{
    runtime::Handle,
    sync::{watch, Notify, OwnedSemaphorePermit, Semaphore},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

pub const MAX_WORKERS_VAR: &str = "DISPATCH_MAX_WORKERS";
pub const MAX_PENDING_VAR: &str = "DISPATCH_MAX_PENDING";

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Upper bound on concurrently running handler invocations.
    pub max_workers: usize,
    /// Queue capacity; `None` keeps the queue unbounded.
    pub max_pending: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get(),
            max_pending: None,
        }
    }
}

impl Config {
    /// One worker slot per logical CPU.
    pub fn cpu_bound() -> Self {
        Self {
            max_workers: num_cpus::get(),
            max_pending: None,
        }
    }

    /// Twice the CPU count, for handlers that mostly wait on I/O.
    pub fn io_bound() -> Self {
        Self {
            max_workers: num_cpus::get() * 2,
            max_pending: None,
        }
    }

    /// Fixed slot count with a capped queue. Submits beyond `max_pending`
    /// queued items fail with [`DispatchError::QueueFull`] instead of
    /// growing memory.
    pub fn bounded(max_workers: usize, max_pending: usize) -> Self {
        Self {
            max_workers,
            max_pending: Some(max_pending),
        }
    }

    /// Checks the invariants the dispatcher relies on:
    ///
    /// - at least one worker slot;
    /// - a set `max_pending` is non-zero (a zero-capacity queue would reject
    ///   everything).
    pub fn validate(&self) -> DispatchResult<()> {
        if self.max_workers < 1 {
            return Err(DispatchError::Config(format!(
                "max_workers must be at least 1, got {}",
                self.max_workers
            )));
        }
        if self.max_pending == Some(0) {
            return Err(DispatchError::Config(
                "max_pending must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Reads `DISPATCH_MAX_WORKERS` / `DISPATCH_MAX_PENDING` on top of the
    /// defaults.
    pub fn from_env() -> DispatchResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> DispatchResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|raw| !raw.trim().is_empty());

        let mut config = Self::default();
        if let Some(raw) = var(MAX_WORKERS_VAR) {
            config.max_workers = parse_count(MAX_WORKERS_VAR, &raw)?;
        }
        if let Some(raw) = var(MAX_PENDING_VAR) {
            config.max_pending = Some(parse_count(MAX_PENDING_VAR, &raw)?);
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_count(name: &str, raw: &str) -> DispatchResult<usize> {
    raw.trim()
        .parse()
        .map_err(|e| DispatchError::Config(format!("{name}={raw:?} is not a valid count: {e}")))
}

struct Envelope<T> {
    id: TaskId,
    item: T,
    enqueued_at: Instant,
}

pub type SharedDispatcher<T, H> = Arc<Dispatcher<T, H>>;

type ShutdownTask = Shared<BoxFuture<'static, DispatchResult<ShutdownReport>>>;

/// Feeds queued items to a handler with at most `max_workers` invocations in
/// flight.
///
/// Every accepted submit and every finished invocation makes one dispatch
/// attempt: grab a free worker slot, pop one item, run it. Nothing is popped
/// ahead of a free slot, and a busy pool is always drained by its own
/// completions.
pub struct Dispatcher<T, H> {
    handler: H,
    queue: TaskQueue<Envelope<T>>,
    workers: Arc<Semaphore>,
    state: watch::Sender<State>,
    observer: Arc<dyn Observer>,
    runtime: Handle,
    // items popped (or about to be) but not yet finished
    in_flight: AtomicUsize,
    drained: Notify,
    next_id: AtomicU64,
    accepted: AtomicUsize,
    rejected: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    abandoned: AtomicUsize,
    // spawned on the first shutdown call; every caller awaits a clone
    shutdown_task: OnceLock<ShutdownTask>,
    config: Config,
}

impl<T, H> Dispatcher<T, H>
where
    T: Send + 'static,
    H: Handler<T>,
{
    /// Unbounded queue, `max_workers` slots, events logged through `tracing`.
    pub fn new(handler: H, max_workers: usize) -> DispatchResult<SharedDispatcher<T, H>> {
        let config = Config {
            max_workers,
            ..Default::default()
        };
        Self::with_config(handler, config, Arc::new(TracingObserver))
    }

    /// Must be called from within a Tokio runtime; workers are spawned onto it.
    pub fn with_config(
        handler: H,
        config: Config,
        observer: Arc<dyn Observer>,
    ) -> DispatchResult<SharedDispatcher<T, H>> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            DispatchError::Config(format!("dispatcher needs a Tokio runtime: {e}"))
        })?;

        let queue = match config.max_pending {
            Some(capacity) => TaskQueue::bounded(capacity),
            None => TaskQueue::unbounded(),
        };
        let (state, _) = watch::channel(State::Running);

        Ok(Arc::new(Self {
            handler,
            queue,
            workers: Arc::new(Semaphore::new(config.max_workers)),
            state,
            observer,
            runtime,
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            next_id: AtomicU64::new(0),
            accepted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            abandoned: AtomicUsize::new(0),
            shutdown_task: OnceLock::new(),
            config,
        }))
    }

    /// Queues `item` and returns without waiting for it to be processed.
    ///
    /// After shutdown has begun (or when a bounded queue is full) the item is
    /// dropped, a `Rejected` event is reported and the error is returned.
    pub fn submit(self: &Arc<Self>, item: T) -> DispatchResult<TaskId> {
        // The state read guard is held across the push so a concurrent
        // shutdown either sees this item queued or we see the new state.
        let pushed = {
            let guard = self.state.borrow();
            let state = *guard;
            if state != State::Running {
                Err(DispatchError::Rejected { state })
            } else {
                let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
                let envelope = Envelope {
                    id,
                    item,
                    enqueued_at: Instant::now(),
                };
                match self.queue.push(envelope) {
                    Ok(()) => {
                        self.accepted.fetch_add(1, Ordering::Relaxed);
                        Ok(id)
                    }
                    Err(_) => Err(DispatchError::QueueFull {
                        capacity: self.queue.capacity().unwrap_or_default(),
                    }),
                }
            }
        };

        let id = match pushed {
            Ok(id) => id,
            Err(error) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                self.emit(&DispatchEvent::Rejected {
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        self.emit(&DispatchEvent::Accepted {
            task: id,
            queued: self.queue.len(),
        });

        // pairs with the fence in `dispatch` after a slot is handed back
        fence(Ordering::SeqCst);
        self.dispatch();
        Ok(id)
    }

    /// One dispatch attempt: at most one slot, at most one item.
    fn dispatch(self: &Arc<Self>) {
        for _ in 0..2 {
            if *self.state.borrow() == State::Stopped {
                return;
            }
            let Ok(permit) = Arc::clone(&self.workers).try_acquire_owned() else {
                // every slot is busy; the next completion retries
                return;
            };

            // counted before the pop so drain checks never miss an item in
            // transit between the queue and a worker
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            if let Some(envelope) = self.queue.pop() {
                self.spawn_worker(permit, envelope);
                return;
            }
            drop(permit);
            self.finish_in_flight();

            // A submit that found every slot busy may have pushed while we
            // held this one. Recheck after releasing it.
            fence(Ordering::SeqCst);
            if self.queue.is_empty() {
                return;
            }
        }

        // Still counted but not poppable: a producer is between reserving
        // its place and publishing the item. Look again after yielding
        // instead of spinning on this thread.
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::task::yield_now().await;
            this.dispatch();
        });
    }

    fn spawn_worker(self: &Arc<Self>, permit: OwnedSemaphorePermit, envelope: Envelope<T>) {
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            let Envelope {
                id,
                item,
                enqueued_at,
            } = envelope;
            let started = Instant::now();
            this.emit(&DispatchEvent::Started {
                task: id,
                queue_wait: started.saturating_duration_since(enqueued_at),
            });

            let handler = &this.handler;
            let outcome = AssertUnwindSafe(async move { handler.process(item).await })
                .catch_unwind()
                .await;
            let elapsed = started.elapsed();

            let event = match outcome {
                Ok(Ok(())) => {
                    this.completed.fetch_add(1, Ordering::Relaxed);
                    DispatchEvent::Completed { task: id, elapsed }
                }
                Ok(Err(err)) => {
                    this.failed.fetch_add(1, Ordering::Relaxed);
                    DispatchEvent::Failed {
                        task: id,
                        error: DispatchError::Handler {
                            task: id,
                            message: err.to_string(),
                        },
                        elapsed,
                    }
                }
                Err(panic) => {
                    this.failed.fetch_add(1, Ordering::Relaxed);
                    DispatchEvent::Failed {
                        task: id,
                        error: DispatchError::Panic {
                            task: id,
                            message: panic_message(&*panic),
                        },
                        elapsed,
                    }
                }
            };
            this.emit(&event);

            drop(permit);
            this.finish_in_flight();
            this.dispatch();
        });
    }

    /// Stops intake and waits up to `timeout` for queued and running items.
    ///
    /// Either way the dispatcher ends up `Stopped`. On timeout the items still
    /// queued are dropped unprocessed and `ShutdownTimeout` is returned;
    /// invocations already running are not interrupted and may outlive this
    /// call.
    ///
    /// The drain runs as its own task: dropping this future (say, under
    /// `tokio::time::timeout`) stops the waiting, not the shutdown. Only the
    /// first call starts it. Later and concurrent calls get the same outcome
    /// and their `timeout` is ignored.
    pub async fn shutdown(self: &Arc<Self>, timeout: Duration) -> DispatchResult<ShutdownReport> {
        let task = self.shutdown_task.get_or_init(|| {
            self.begin_shutdown();
            let this = Arc::clone(self);
            self.runtime
                .spawn(async move { this.drain_and_stop(timeout).await })
                .map(|joined| {
                    joined.unwrap_or_else(|e| {
                        Err(DispatchError::ShutdownAborted(e.to_string()))
                    })
                })
                .boxed()
                .shared()
        });
        task.clone().await
    }

    #[inline]
    fn finish_in_flight(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

impl<T, H> Dispatcher<T, H> {
    #[inline]
    fn is_drained(&self) -> bool {
        // queue first: a popped item is already counted in `in_flight`
        self.queue.is_empty() && self.in_flight.load(Ordering::SeqCst) == 0
    }

    /// Waits until nothing is queued or running. Does not stop intake.
    pub async fn join_all(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }

    /// `true` if the dispatcher drained within `timeout`.
    pub async fn join_all_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.join_all()).await.is_ok()
    }

    fn begin_shutdown(&self) {
        self.state.send_if_modified(|state| {
            if *state == State::Running {
                *state = State::ShuttingDown;
                true
            } else {
                false
            }
        });
        self.emit(&DispatchEvent::ShutdownRequested {
            queued: self.queue.len(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        });
    }

    async fn drain_and_stop(&self, timeout: Duration) -> DispatchResult<ShutdownReport> {
        let started = Instant::now();
        if self.join_all_timeout(timeout).await {
            self.state.send_replace(State::Stopped);
            let report = ShutdownReport {
                completed: self.completed.load(Ordering::SeqCst),
                failed: self.failed.load(Ordering::SeqCst),
                elapsed: started.elapsed(),
            };
            self.emit(&DispatchEvent::ShutdownCompleted {
                completed: report.completed,
                failed: report.failed,
                elapsed: report.elapsed,
            });
            return Ok(report);
        }

        self.state.send_replace(State::Stopped);
        let mut abandoned = 0;
        while self.queue.pop().is_some() {
            abandoned += 1;
        }
        self.abandoned.fetch_add(abandoned, Ordering::SeqCst);
        let in_flight = self.in_flight.load(Ordering::SeqCst);

        self.emit(&DispatchEvent::ShutdownTimedOut {
            abandoned,
            in_flight,
        });
        Err(DispatchError::ShutdownTimeout {
            timeout,
            abandoned,
            in_flight,
        })
    }

    // A panicking observer must not take down the bookkeeping around it.
    fn emit(&self, event: &DispatchEvent) {
        let observer = &self.observer;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
            tracing::error!(
                panic = %panic_message(&*payload),
                ?event,
                "observer panicked"
            );
        }
    }

    /// Resolves once the dispatcher is `Stopped`.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == State::Stopped).await;
    }

    /// Current lifecycle state. May be stale by the time the caller looks.
    #[inline]
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.state() == State::Stopped
    }

    #[inline]
    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    /// Point-in-time snapshot. Fields are read one by one, so under load
    /// they need not add up exactly.
    pub fn metrics(&self) -> DispatcherMetrics {
        let idle_workers = self.workers.available_permits();
        DispatcherMetrics {
            state: self.state(),
            max_workers: self.config.max_workers,
            active_workers: self.config.max_workers.saturating_sub(idle_workers),
            idle_workers,
            queued_tasks: self.queue.len(),
            accepted_tasks: self.accepted.load(Ordering::Relaxed),
            rejected_tasks: self.rejected.load(Ordering::Relaxed),
            completed_tasks: self.completed.load(Ordering::Relaxed),
            failed_tasks: self.failed.load(Ordering::Relaxed),
            abandoned_tasks: self.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Calls `callback` with a metrics snapshot every `interval` until the
    /// returned token is cancelled or the dispatcher stops.
    pub fn start_monitoring<F>(
        self: &Arc<Self>,
        interval: Duration,
        callback: F,
    ) -> CancellationToken
    where
        T: Send + 'static,
        H: Send + Sync + 'static,
        F: Fn(DispatcherMetrics) + Send + 'static,
    {
        let dispatcher = Arc::clone(self);
        let token = CancellationToken::new();
        let token_clone = token.clone();

        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        callback(dispatcher.metrics());
                        if dispatcher.is_stopped() {
                            break;
                        }
                    }
                    _ = token_clone.cancelled() => {
                        break;
                    }
                }
            }
        });

        token
    }
}

impl<T, H> fmt::Debug for Dispatcher<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
