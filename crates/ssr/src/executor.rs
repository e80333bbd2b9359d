//! The seam between rendering and script execution.

use async_trait::async_trait;
use serde_json::Value;
use ssrkit_core::GeneratedScript;

use crate::error::Result;
use crate::pool::SsrPool;

/// Runs a generated script and returns its parsed JSON result.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, script: &GeneratedScript) -> Result<Value>;
}

#[async_trait]
impl ScriptExecutor for SsrPool {
    async fn execute(&self, script: &GeneratedScript) -> Result<Value> {
        SsrPool::execute(self, script.as_str()).await
    }
}
