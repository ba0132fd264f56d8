//! Fire-and-forget dispatch of client responses to data handlers.
//!
//! The engine hands a raw response to [`Dispatcher::dispatch`] keyed by
//! the catalog entry it answers. The call returns immediately; the job
//! is queued on a bounded channel and a supervisor task runs it under a
//! concurrency limit and a deadline. Handler errors, timeouts and panics
//! are logged here and never reach the protocol caller.
//! [`Dispatcher::shutdown`] stops intake and waits for queued and
//! running jobs.

mod inventory;

pub use inventory::{INVENTORY_REQUEST, InventoryHandler, InventorySummary};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ConnectorError, DispatchError};

// ── ResponseHandler ──────────────────────────────────────────────

/// Consumer of one kind of client response.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn handle(&self, payload: String) -> Result<(), ConnectorError>;
}

// ── HandlerRegistry ──────────────────────────────────────────────

/// Catalog entry name → handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ResponseHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers.
    pub fn with_defaults(parse_limit: usize) -> Self {
        let mut registry = Self::new();
        registry.register(INVENTORY_REQUEST, InventoryHandler::new(parse_limit));
        registry
    }

    /// Register `handler` for responses to the request named `name`,
    /// replacing any previous handler.
    pub fn register(&mut self, name: impl Into<String>, handler: impl ResponseHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ResponseHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── DispatchConfig ───────────────────────────────────────────────

/// Limits applied to background handler work.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Jobs that may wait for a worker before new ones are dropped.
    pub queue_depth: usize,
    /// Handlers allowed to run at the same time.
    pub max_concurrent: usize,
    /// Deadline for a single handler run.
    pub handler_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            max_concurrent: 4,
            handler_timeout: Duration::from_secs(120),
        }
    }
}

// ── Events & stats ───────────────────────────────────────────────

/// Outcome of one handler job, streamed to an optional observer.
#[derive(Debug)]
pub enum DispatchEvent {
    Finished { job: u64, name: String },
    Failed { job: u64, name: String, error: DispatchError },
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl DispatchStats {
    /// Jobs accepted but not yet finished.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed)
            .saturating_sub(self.failed)
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

struct Job {
    id: u64,
    name: String,
    handler: Arc<dyn ResponseHandler>,
    payload: String,
}

type EventSender = mpsc::UnboundedSender<DispatchEvent>;

/// Bounded, supervised background runner for response handlers.
///
/// Must be started inside a Tokio runtime. The supervisor stops once the
/// queue is closed (by [`shutdown`](Self::shutdown) or by dropping the
/// dispatcher) and has drained.
pub struct Dispatcher {
    registry: HandlerRegistry,
    queue: mpsc::Sender<Job>,
    next_job: AtomicU64,
    counters: Arc<Counters>,
    permits: Arc<Semaphore>,
    slots: u32,
    close: Arc<Notify>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start the supervisor task and return the submitting side.
    pub fn start(registry: HandlerRegistry, config: DispatchConfig) -> Self {
        Self::spawn(registry, config, None)
    }

    /// Like [`start`](Self::start), also streaming every job outcome.
    pub fn start_with_events(
        registry: HandlerRegistry,
        config: DispatchConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::spawn(registry, config, Some(tx)), rx)
    }

    fn spawn(registry: HandlerRegistry, config: DispatchConfig, events: Option<EventSender>) -> Self {
        let (queue, rx) = mpsc::channel(config.queue_depth.max(1));
        let counters = Arc::new(Counters::default());
        let slots = u32::try_from(config.max_concurrent.max(1)).unwrap_or(u32::MAX);
        let permits = Arc::new(Semaphore::new(slots as usize));
        let close = Arc::new(Notify::new());
        info!(
            handlers = ?registry.names().collect::<Vec<_>>(),
            queue_depth = config.queue_depth,
            max_concurrent = slots,
            "dispatcher started"
        );

        let supervisor = tokio::spawn(supervise(
            rx,
            config.handler_timeout,
            Arc::clone(&permits),
            Arc::clone(&close),
            Arc::clone(&counters),
            events,
        ));
        Self {
            registry,
            queue,
            next_job: AtomicU64::new(1),
            counters,
            permits,
            slots,
            close,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    /// Queue `payload` for the handler registered under `name`.
    ///
    /// Returns `Ok(None)` when no handler is registered, `Ok(Some(job))`
    /// once queued. Never blocks: a full queue drops the job.
    pub fn dispatch(&self, name: &str, payload: String) -> Result<Option<u64>, DispatchError> {
        let Some(handler) = self.registry.get(name) else {
            debug!(name, "no handler registered");
            return Ok(None);
        };

        let id = self.next_job.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            id,
            name: name.to_string(),
            handler,
            payload,
        };

        match self.queue.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(job = id, name, "handler job queued");
                Ok(Some(id))
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let err = DispatchError::from(e);
                warn!(job = id, name, "dropping handler job: {err}");
                Err(err)
            }
        }
    }

    /// Stop accepting jobs and wait up to `grace` for queued and running
    /// jobs to finish. Later [`dispatch`](Self::dispatch) calls fail with
    /// [`DispatchError::Closed`].
    ///
    /// Returns the final counters; `in_flight()` is the number of jobs
    /// abandoned when `grace` ran out.
    pub async fn shutdown(&self, grace: Duration) -> DispatchStats {
        self.close.notify_one();
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let permits = Arc::clone(&self.permits);
        let slots = self.slots;

        let drained = tokio::time::timeout(grace, async move {
            if let Some(handle) = supervisor {
                let _ = handle.await;
            }
            // Every permit free: no job is running.
            let _ = permits.acquire_many(slots).await;
        })
        .await;

        let stats = self.stats();
        match drained {
            Ok(()) => info!(
                completed = stats.completed,
                failed = stats.failed,
                dropped = stats.dropped,
                "dispatcher drained"
            ),
            Err(_) => warn!(
                abandoned = stats.in_flight(),
                grace_ms = grace.as_millis() as u64,
                "dispatcher shutdown grace elapsed; abandoning jobs"
            ),
        }
        stats
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn supervise(
    mut rx: mpsc::Receiver<Job>,
    limit: Duration,
    permits: Arc<Semaphore>,
    close: Arc<Notify>,
    counters: Arc<Counters>,
    events: Option<EventSender>,
) {
    let mut closing = false;

    loop {
        let job = tokio::select! {
            job = rx.recv() => job,
            _ = close.notified(), if !closing => {
                // Refuse new jobs; the buffered ones still run.
                rx.close();
                closing = true;
                continue;
            }
        };
        let Some(job) = job else { break };

        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };
        let counters = Arc::clone(&counters);
        let events = events.clone();

        tokio::spawn(async move {
            // Held until the outcome is counted, so a drain sees it.
            let _permit = permit;
            let (id, name) = (job.id, job.name.clone());
            let result = run_job(job, limit).await;

            let event = match result {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    DispatchEvent::Finished { job: id, name }
                }
                Err(error) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(job = id, name = %name, "handler job failed: {error}");
                    DispatchEvent::Failed { job: id, name, error }
                }
            };
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
        });
    }

    info!("dispatcher queue closed; supervisor exiting");
}

async fn run_job(job: Job, limit: Duration) -> Result<(), DispatchError> {
    let started = Instant::now();
    let Job {
        id, handler, payload, ..
    } = job;

    let run = AssertUnwindSafe(handler.handle(payload)).catch_unwind();
    match tokio::time::timeout(limit, run).await {
        Err(_) => Err(DispatchError::Timeout(limit)),
        Ok(Err(panic)) => Err(DispatchError::Panicked(panic_message(&*panic))),
        Ok(Ok(Err(e))) => Err(DispatchError::Handler(e.to_string())),
        Ok(Ok(Ok(()))) => {
            debug!(job = id, elapsed = ?started.elapsed(), "handler job finished");
            Ok(())
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────
