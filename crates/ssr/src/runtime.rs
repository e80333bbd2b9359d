//! JsRuntime execution contexts.
//!
//! This module contains the impure side-effect code that evaluates the
//! prelude, the bundle and generated scripts using deno_core's JsRuntime.

use std::cell::RefCell;
use std::time::{Duration, Instant};

use deno_core::{extension, op2, v8, JsRuntime, RuntimeOptions};
use serde_json::Value;
use ssrkit_core::generate_prelude;

use crate::bundle::{BundleFingerprint, BundleSource};
use crate::error::{Result, SsrError};

thread_local! {
    /// Thread-local storage for the JSON text a script returned.
    /// This is used because deno_core ops can't easily return complex values.
    static SCRIPT_RESULT: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Custom op to receive a script's JSON result from JavaScript.
#[op2(fast)]
fn op_ssr_set_result(#[string] json: String) {
    SCRIPT_RESULT.with(|cell| {
        *cell.borrow_mut() = Some(json);
    });
}

extension!(ssr_ext, ops = [op_ssr_set_result]);

fn take_result() -> Option<String> {
    SCRIPT_RESULT.with(|cell| cell.borrow_mut().take())
}

/// A JavaScript context with the prelude and one bundle evaluated.
///
/// **MUST stay on the thread that built it** - `JsRuntime` is not `Send`.
pub struct ExecutionContext {
    runtime: JsRuntime,
    fingerprint: BundleFingerprint,
    last_used_at: Instant,
}

impl ExecutionContext {
    /// Build a fresh context: prelude first, then the bundle.
    ///
    /// `publish` receives the isolate handle before any JavaScript runs, so
    /// a prelude or bundle that never returns can still be terminated.
    pub fn load(
        bundle: &BundleSource,
        node_env: &str,
        publish: impl FnOnce(v8::IsolateHandle),
    ) -> Result<Self> {
        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![ssr_ext::init()],
            ..Default::default()
        });
        publish(runtime.v8_isolate().thread_safe_handle());

        let load_error = |reason: String| SsrError::BundleLoad {
            path: bundle.fingerprint.path.display().to_string(),
            reason,
        };

        runtime
            .execute_script("<ssr-prelude>", generate_prelude(node_env))
            .map_err(|e| load_error(format!("prelude failed: {e}")))?;

        runtime
            .execute_script("<ssr-bundle>", bundle.code.clone())
            .map_err(|e| load_error(e.to_string()))?;

        Ok(Self {
            runtime,
            fingerprint: bundle.fingerprint.clone(),
            last_used_at: Instant::now(),
        })
    }

    /// Evaluate a generated script and parse the JSON text it returns.
    ///
    /// Exceptions that escape the script surface as `JsExecution`; the
    /// context stays usable afterwards. A failure in promise jobs the script
    /// left behind is logged and does not discard a result already returned.
    pub async fn execute(&mut self, script: &str) -> Result<Value> {
        take_result();
        self.last_used_at = Instant::now();

        let wrapped = format!("Deno.core.ops.op_ssr_set_result({script});");
        self.runtime
            .execute_script("<ssr-script>", wrapped)
            .map_err(|e| SsrError::JsExecution(e.to_string()))?;

        // Run event loop to completion (handles promise jobs queued by the script)
        let event_loop = self.runtime.run_event_loop(Default::default()).await;

        let output = match (take_result(), event_loop) {
            (Some(output), Ok(())) => output,
            (Some(output), Err(e)) => {
                tracing::warn!(error = %e, "Pending job failed after script returned its result");
                output
            }
            (None, Err(e)) => return Err(SsrError::JsExecution(e.to_string())),
            (None, Ok(())) => return Err(SsrError::NoResult),
        };
        serde_json::from_str(&output).map_err(|e| SsrError::Deserialization(e.to_string()))
    }

    pub fn fingerprint(&self) -> &BundleFingerprint {
        &self.fingerprint
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }
}
