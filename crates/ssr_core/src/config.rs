//! Configuration for the execution pool, with validation.

use std::env;

use crate::error::{Result, SsrCoreError};
use crate::options::env_flag;

/// Configuration for the SSR execution pool (validated).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SsrPoolConfig {
    /// Number of execution contexts (one worker thread each).
    pub worker_count: usize,
    /// Render timeout in milliseconds.
    pub render_timeout_ms: u64,
    /// How long a caller may wait for a free context. `None` waits forever.
    pub acquire_timeout_ms: Option<u64>,
    /// Rebuild contexts whose bundle changed on disk.
    pub check_staleness: bool,
    /// NODE_ENV value.
    pub node_env: String,
}

impl SsrPoolConfig {
    /// Create and validate pool config.
    pub fn new(worker_count: usize, render_timeout_ms: u64, node_env: String) -> Result<Self> {
        if worker_count == 0 {
            return Err(SsrCoreError::InvalidWorkerCount);
        }
        if render_timeout_ms == 0 {
            return Err(SsrCoreError::InvalidTimeout);
        }

        Ok(Self {
            worker_count,
            render_timeout_ms,
            acquire_timeout_ms: None,
            check_staleness: true,
            node_env,
        })
    }

    /// Create with defaults (10s timeout, production, staleness checks on).
    pub fn with_defaults(worker_count: usize) -> Result<Self> {
        Self::new(worker_count, 10_000, "production".to_string())
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SSR_WORKERS` - Context count (default: available parallelism)
    /// - `SSR_RENDER_TIMEOUT_MS` - Render timeout (default: 10,000)
    /// - `SSR_ACQUIRE_TIMEOUT_MS` - Max wait for a free context (default: unbounded)
    /// - `SSR_CHECK_STALENESS` - Reload changed bundles (default: true)
    /// - `NODE_ENV` - Exposed to the bundle (default: "production")
    pub fn from_env() -> Result<Self> {
        let worker_count = match env::var("SSR_WORKERS") {
            Ok(value) => value
                .parse()
                .map_err(|_| SsrCoreError::InvalidConfig(format!("SSR_WORKERS={value}")))?,
            Err(_) => std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4),
        };
        let render_timeout_ms = match env::var("SSR_RENDER_TIMEOUT_MS") {
            Ok(value) => value.parse().map_err(|_| {
                SsrCoreError::InvalidConfig(format!("SSR_RENDER_TIMEOUT_MS={value}"))
            })?,
            Err(_) => 10_000,
        };
        let acquire_timeout_ms = match env::var("SSR_ACQUIRE_TIMEOUT_MS") {
            Ok(value) => Some(value.parse().map_err(|_| {
                SsrCoreError::InvalidConfig(format!("SSR_ACQUIRE_TIMEOUT_MS={value}"))
            })?),
            Err(_) => None,
        };
        let node_env = env::var("NODE_ENV").unwrap_or_else(|_| "production".to_string());

        Ok(Self::new(worker_count, render_timeout_ms, node_env)?
            .with_acquire_timeout_ms(acquire_timeout_ms)
            .with_check_staleness(env_flag("SSR_CHECK_STALENESS").unwrap_or(true)))
    }

    pub fn with_acquire_timeout_ms(mut self, acquire_timeout_ms: Option<u64>) -> Self {
        self.acquire_timeout_ms = acquire_timeout_ms;
        self
    }

    pub fn with_check_staleness(mut self, check_staleness: bool) -> Self {
        self.check_staleness = check_staleness;
        self
    }
}
