//! SSR execution pool.
//!
//! The pool owns a fixed set of workers. Each script checks out an idle
//! worker for its whole execution, so no context ever runs two scripts at
//! once; callers beyond capacity wait for a worker to be returned.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use ssrkit_core::{build_eval_script, RenderOptions, SsrPoolConfig};
use tokio::sync::{oneshot, Semaphore, SemaphorePermit};

use crate::bundle::{canonical_bundle_path, BundleResolver, StaticBundle};
use crate::error::{Result, SsrError};
use crate::worker::{ExecuteRequest, SsrWorker};

/// A pool of execution contexts, one per worker thread.
pub struct SsrPool {
    workers: Vec<SsrWorker>,
    idle: Mutex<Vec<usize>>,
    permits: Semaphore,
    config: Arc<SsrPoolConfig>,
    resolver: Arc<dyn BundleResolver>,
}

/// An exclusively checked-out worker. Returned to the pool on drop.
struct PooledWorker<'a> {
    pool: &'a SsrPool,
    index: usize,
    _permit: SemaphorePermit<'a>,
}

impl PooledWorker<'_> {
    fn worker(&self) -> &SsrWorker {
        &self.pool.workers[self.index]
    }
}

impl Drop for PooledWorker<'_> {
    fn drop(&mut self) {
        // Runs before the permit is released, so a permit always finds an index.
        lock_idle(&self.pool.idle).push(self.index);
    }
}

/// A script handed to a worker whose response has not arrived yet.
///
/// Dropping it early (the caller's future was cancelled) terminates the
/// script so the worker is not returned to the pool still running it.
struct InFlight<'a> {
    worker: &'a SsrWorker,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(
                worker = self.worker.id(),
                "Script abandoned by caller, terminating execution context"
            );
            self.worker.terminate();
        }
    }
}

fn lock_idle(idle: &Mutex<Vec<usize>>) -> std::sync::MutexGuard<'_, Vec<usize>> {
    idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SsrPool {
    /// Create a new SSR pool.
    ///
    /// This is an I/O operation that:
    /// - Checks the bundle currently resolves to a readable `.js` file
    /// - Spawns worker threads
    ///
    /// Contexts are built lazily by the first script each worker runs.
    pub fn new(config: SsrPoolConfig, resolver: Arc<dyn BundleResolver>) -> Result<Self> {
        let bundle_path = canonical_bundle_path(&resolver.bundle_path()?)?;
        let config = Arc::new(config);

        let workers = (0..config.worker_count)
            .map(|id| SsrWorker::spawn(id, Arc::clone(&resolver), Arc::clone(&config)))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            worker_count = workers.len(),
            bundle_path = %bundle_path.display(),
            render_timeout_ms = config.render_timeout_ms,
            check_staleness = config.check_staleness,
            "SSR pool initialized"
        );

        Ok(Self {
            idle: Mutex::new((0..workers.len()).rev().collect()),
            permits: Semaphore::new(workers.len()),
            workers,
            config,
            resolver,
        })
    }

    /// Create a pool for a bundle at a fixed path.
    pub fn from_path(config: SsrPoolConfig, bundle_path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(config, Arc::new(StaticBundle::new(bundle_path)))
    }

    /// Create pool and warm up all workers.
    ///
    /// Sends a trivial script to each worker so every context is built
    /// before the first real request.
    pub async fn new_with_warmup(
        config: SsrPoolConfig,
        resolver: Arc<dyn BundleResolver>,
    ) -> Result<Self> {
        let pool = Self::new(config, resolver)?;

        tracing::info!("Warming up {} SSR workers...", pool.workers.len());

        let warmup = build_eval_script("'warmup'", &RenderOptions::default());
        for worker in &pool.workers {
            match pool.send(worker, warmup.as_str()).await {
                Ok(_) => tracing::debug!(worker = worker.id(), "Worker warmed up"),
                Err(e) => tracing::warn!(worker = worker.id(), error = %e, "Worker warmup failed"),
            }
        }

        tracing::info!("SSR pool warm-up complete");
        Ok(pool)
    }

    /// Execute a generated script in an idle context and return its parsed
    /// JSON result.
    ///
    /// Waits for a free context, up to the configured acquire timeout
    /// (`Overloaded` when exceeded). A script that runs past the render
    /// timeout is interrupted and its context is rebuilt before reuse.
    pub async fn execute(&self, script: &str) -> Result<Value> {
        let pooled = self.acquire().await?;
        self.send(pooled.worker(), script).await
    }

    async fn acquire(&self) -> Result<PooledWorker<'_>> {
        let permit = match self.config.acquire_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), self.permits.acquire())
                .await
                .map_err(|_| {
                    tracing::warn!(acquire_timeout_ms = ms, "No idle SSR context available");
                    SsrError::Overloaded {
                        retry_after_secs: retry_after_secs(ms),
                    }
                })?,
            None => self.permits.acquire().await,
        }
        .map_err(|_| SsrError::ChannelClosed)?;

        let index = lock_idle(&self.idle).pop().ok_or(SsrError::ChannelClosed)?;
        Ok(PooledWorker {
            pool: self,
            index,
            _permit: permit,
        })
    }

    async fn send(&self, worker: &SsrWorker, script: &str) -> Result<Value> {
        let (response_tx, response_rx) = oneshot::channel();

        worker
            .sender()
            .send(ExecuteRequest {
                script: script.to_string(),
                response_tx,
            })
            .await
            .map_err(|_| SsrError::ChannelClosed)?;

        let in_flight = InFlight {
            worker,
            armed: true,
        };

        // Wait for response with timeout
        let timeout = Duration::from_millis(self.config.render_timeout_ms);
        let outcome = tokio::time::timeout(timeout, response_rx).await;
        in_flight.disarm();
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SsrError::ChannelClosed),
            Err(_) => {
                tracing::warn!(
                    worker = worker.id(),
                    render_timeout_ms = self.config.render_timeout_ms,
                    "Script timed out, terminating execution context"
                );
                worker.terminate();
                Err(SsrError::Timeout(self.config.render_timeout_ms))
            }
        }
    }

    /// Get pool statistics (passive - no I/O).
    pub fn stats(&self) -> SsrPoolStats {
        SsrPoolStats {
            worker_count: self.workers.len(),
            idle_workers: self.permits.available_permits(),
            loaded_contexts: self.workers.iter().filter(|w| w.is_loaded()).count(),
            context_builds: self.workers.iter().map(SsrWorker::builds).sum(),
        }
    }

    /// Active health check - verifies a context can evaluate a script.
    ///
    /// Runs under the same acquire and render timeouts as any other script.
    /// Returns `Ok(HealthStatus)` with latency once a context was checked out.
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let start = Instant::now();
        let script = build_eval_script("'ok'", &RenderOptions::default());

        let pooled = self.acquire().await?;
        let worker_idx = pooled.index;
        let result = self.send(pooled.worker(), script.as_str()).await;
        drop(pooled);

        let latency_ms = start.elapsed().as_millis() as u64;
        Ok(match result {
            Ok(_) => HealthStatus {
                healthy: true,
                latency_ms,
                worker_idx,
                stats: self.stats(),
                error: None,
            },
            Err(e) => HealthStatus {
                healthy: false,
                latency_ms,
                worker_idx,
                stats: self.stats(),
                error: Some(e.to_string()),
            },
        })
    }

    pub fn config(&self) -> &SsrPoolConfig {
        &self.config
    }

    pub fn resolver(&self) -> &dyn BundleResolver {
        self.resolver.as_ref()
    }
}

fn retry_after_secs(acquire_timeout_ms: u64) -> u32 {
    acquire_timeout_ms.div_ceil(1000).max(1) as u32
}

/// Pool statistics (passive data).
#[derive(Debug, Clone, Serialize)]
pub struct SsrPoolStats {
    pub worker_count: usize,
    pub idle_workers: usize,
    pub loaded_contexts: usize,
    pub context_builds: u64,
}

/// Health check result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: u64,
    pub worker_idx: usize,
    pub stats: SsrPoolStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
