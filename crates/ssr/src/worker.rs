//! SSR worker thread management.
//!
//! Each worker runs in a dedicated thread with its own Tokio runtime
//! because `deno_core::JsRuntime` is not `Send`. A worker owns at most one
//! execution context, built on first use and rebuilt when it is poisoned
//! by a timeout or its bundle goes stale.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use deno_core::v8;
use serde_json::Value;
use ssrkit_core::SsrPoolConfig;
use tokio::sync::{mpsc, oneshot};

use crate::bundle::{BundleFingerprint, BundleResolver, BundleSource};
use crate::error::{Result, SsrError};
use crate::runtime::ExecutionContext;

/// Script sent to a worker for execution.
pub struct ExecuteRequest {
    /// Generated script source.
    pub script: String,
    /// Channel to send the result back.
    pub response_tx: oneshot::Sender<Result<Value>>,
}

/// State shared between a worker thread and the pool.
#[derive(Default)]
struct WorkerShared {
    isolate: Mutex<Option<v8::IsolateHandle>>,
    poisoned: AtomicBool,
    loaded: AtomicBool,
    builds: AtomicU64,
}

/// A dedicated SSR worker thread.
pub struct SsrWorker {
    id: usize,
    request_tx: mpsc::Sender<ExecuteRequest>,
    shared: Arc<WorkerShared>,
}

impl SsrWorker {
    /// Spawn a new worker thread.
    ///
    /// This is an I/O operation that spawns an OS thread. The execution
    /// context itself is built lazily by the first script.
    pub fn spawn(
        id: usize,
        resolver: Arc<dyn BundleResolver>,
        config: Arc<SsrPoolConfig>,
    ) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<ExecuteRequest>(1);
        let shared = Arc::new(WorkerShared::default());
        let thread_shared = Arc::clone(&shared);

        std::thread::Builder::new()
            .name(format!("ssr-worker-{id}"))
            .spawn(move || run(id, request_rx, resolver, config, thread_shared))
            .map_err(|e| SsrError::WorkerSpawn(e.to_string()))?;

        Ok(Self {
            id,
            request_tx,
            shared,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Get a clone of the sender for sending requests.
    pub fn sender(&self) -> mpsc::Sender<ExecuteRequest> {
        self.request_tx.clone()
    }

    /// Interrupt the running script and force a rebuild before the next one.
    ///
    /// Also interrupts a context that is still evaluating its bundle.
    pub fn terminate(&self) {
        let isolate = lock(&self.shared.isolate);
        self.shared.poisoned.store(true, Ordering::SeqCst);
        if let Some(handle) = isolate.as_ref() {
            handle.terminate_execution();
        }
    }

    /// Whether the worker currently holds a built context.
    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::SeqCst)
    }

    /// How many times this worker has built a context.
    pub fn builds(&self) -> u64 {
        self.shared.builds.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run(
    id: usize,
    mut request_rx: mpsc::Receiver<ExecuteRequest>,
    resolver: Arc<dyn BundleResolver>,
    config: Arc<SsrPoolConfig>,
    shared: Arc<WorkerShared>,
) {
    // Create a single-threaded Tokio runtime for this worker
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            // Dropping the receiver closes the channel; callers see ChannelClosed.
            tracing::error!(worker = id, error = %e, "Failed to create Tokio runtime for SSR worker");
            return;
        }
    };

    rt.block_on(async move {
        tracing::debug!(worker = id, "SSR worker started");
        let mut context: Option<ExecutionContext> = None;

        while let Some(req) = request_rx.recv().await {
            if req.response_tx.is_closed() {
                tracing::debug!(worker = id, "Skipping script abandoned by its caller");
                continue;
            }

            let result = match checkout(id, &mut context, resolver.as_ref(), &config, &shared) {
                Ok(ctx) => ctx.execute(&req.script).await,
                Err(e) => Err(e),
            };
            shared.loaded.store(context.is_some(), Ordering::SeqCst);

            // Send result back, ignoring if receiver dropped
            let _ = req.response_tx.send(result);
        }

        tracing::debug!(worker = id, "SSR worker shutting down");
    });
}

/// Return a context that is safe to run the next script in.
fn checkout<'a>(
    id: usize,
    slot: &'a mut Option<ExecutionContext>,
    resolver: &dyn BundleResolver,
    config: &SsrPoolConfig,
    shared: &WorkerShared,
) -> Result<&'a mut ExecutionContext> {
    let mut current = slot.take();

    if shared.poisoned.swap(false, Ordering::SeqCst) && current.take().is_some() {
        tracing::warn!(worker = id, "Discarding execution context after timeout");
        lock(&shared.isolate).take();
    }

    if config.check_staleness {
        if let Some(ctx) = &current {
            let latest = BundleFingerprint::current(resolver)?;
            if ctx.fingerprint().is_stale(&latest) {
                tracing::info!(
                    worker = id,
                    bundle_path = %latest.path.display(),
                    idle_ms = ctx.idle_for().as_millis() as u64,
                    "Server bundle changed, rebuilding execution context"
                );
                current = None;
                lock(&shared.isolate).take();
            }
        }
    }

    let ctx = match current {
        Some(ctx) => ctx,
        None => build(id, resolver, config, shared)?,
    };
    Ok(slot.insert(ctx))
}

fn build(
    id: usize,
    resolver: &dyn BundleResolver,
    config: &SsrPoolConfig,
    shared: &WorkerShared,
) -> Result<ExecutionContext> {
    let bundle = BundleSource::load(resolver)?;
    let ctx = ExecutionContext::load(&bundle, &config.node_env, |handle| {
        let mut isolate = lock(&shared.isolate);
        // A terminate that arrived before the handle existed still applies.
        if shared.poisoned.load(Ordering::SeqCst) {
            handle.terminate_execution();
        }
        *isolate = Some(handle);
    })?;

    let builds = shared.builds.fetch_add(1, Ordering::SeqCst) + 1;

    tracing::debug!(
        worker = id,
        builds,
        bundle_path = %bundle.fingerprint.path.display(),
        "Execution context built"
    );
    Ok(ctx)
}
