//! SSR execution pool - Imperative Shell.
//!
//! This crate orchestrates I/O operations using pure functions from
//! `ssrkit_core`. It provides a pool of `deno_core` execution contexts and
//! a [`Renderer`] that turns render requests into HTML.
//!
//! # Architecture
//!
//! - **Functional Core** (`ssrkit_core`): Requests, script generation, result interpretation
//! - **Imperative Shell** (this crate): Bundle loading, threading, JsRuntime execution
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ssrkit::{Renderer, RenderRequest, RequestInfo, ResponseScope, SsrPool, SsrPoolConfig};
//!
//! // Create pool (I/O: checks the bundle, spawns threads)
//! let pool = SsrPool::from_path(SsrPoolConfig::with_defaults(4)?, "dist/server.js")?;
//! let renderer = Renderer::new(Arc::new(pool));
//!
//! // One scope per host response
//! let mut scope = ResponseScope::new(RequestInfo::new("production"));
//! let request = RenderRequest::with_defaults("Greeter", serde_json::json!({ "name": "Ada" }))?;
//!
//! // Render (I/O: checks out a context, runs the script)
//! let result = renderer.render(&mut scope, &request).await?;
//! println!("{}", result.payload.component_html());
//! ```

mod bundle;
mod error;
mod executor;
mod pool;
mod renderer;
mod runtime;
mod worker;

// Re-export core types for convenience
pub use ssrkit_core::{
    EvalResult, HydrationQueue, PropsSanitizer, RenderDefaults, RenderFault, RenderOptionOverrides,
    RenderOptions, RenderPayload, RenderRequest, RenderResult, RenderingError, RequestInfo,
    ResponseScope, SsrCoreError, SsrPoolConfig, MAX_PROPS_SIZE,
};

// Export shell types
pub use bundle::{
    BundleFingerprint, BundleResolver, BundleSource, ManifestBundle, StaticBundle,
};
pub use error::{sanitize_error, Result, SsrError};
pub use executor::ScriptExecutor;
pub use pool::{HealthStatus, SsrPool, SsrPoolStats};
pub use renderer::Renderer;
