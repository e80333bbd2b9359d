//! Host-facing entry points: render a component, evaluate an expression.

use std::sync::Arc;

use ssrkit_core::{
    build_eval_script, build_render_script, interpret_eval, interpret_render, EvalResult,
    PropsSanitizer, RenderFault, RenderOptions, RenderRequest, RenderResult, ResponseScope,
    EVAL_COMPONENT_NAME,
};

use crate::error::SsrError;
use crate::executor::ScriptExecutor;

/// Renders components through a [`ScriptExecutor`].
///
/// Every failure, whether reported in-band by the script or raised at the
/// pool boundary, comes back as a [`RenderFault`] with sanitized props.
#[derive(Clone)]
pub struct Renderer {
    executor: Arc<dyn ScriptExecutor>,
    sanitizer: PropsSanitizer,
}

impl Renderer {
    pub fn new(executor: Arc<dyn ScriptExecutor>) -> Self {
        Self {
            executor,
            sanitizer: PropsSanitizer::default(),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: PropsSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn sanitizer(&self) -> &PropsSanitizer {
        &self.sanitizer
    }

    /// Render one component for the response owning `scope`.
    ///
    /// Pending store hydrations of `scope` are consumed by this call. When
    /// prerendering is off nothing is executed and the result is empty.
    pub async fn render(
        &self,
        scope: &mut ResponseScope,
        request: &RenderRequest,
    ) -> Result<RenderResult, RenderFault> {
        if !request.options().prerender {
            return Ok(RenderResult::empty());
        }

        let rails_context = scope.rails_context(true).map_err(|e| {
            RenderFault::from_execution(
                request.component_name(),
                request.props(),
                SsrError::Core(e),
                "",
                &self.sanitizer,
            )
        })?;
        let hydration = scope.hydration_script();
        let script = build_render_script(request, &rails_context, &hydration);

        if request.options().trace {
            tracing::debug!(
                component = request.component_name(),
                dom_id = request.dom_id(),
                script = %script,
                "Generated render script"
            );
        }

        let raw = match self.executor.execute(&script).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(
                    component = request.component_name(),
                    error = %e,
                    "Prerender execution failed"
                );
                return Err(RenderFault::from_execution(
                    request.component_name(),
                    request.props(),
                    e,
                    script.as_str(),
                    &self.sanitizer,
                ));
            }
        };

        let result = interpret_render(raw, request, &script, &self.sanitizer);
        match &result {
            Ok(rendered) if rendered.has_errors => tracing::warn!(
                component = request.component_name(),
                error = rendered
                    .rendering_error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or_default(),
                "Component rendered with errors"
            ),
            Ok(_) => tracing::debug!(component = request.component_name(), "Component rendered"),
            Err(fault) => tracing::error!(
                component = %fault.component_name,
                error = %fault,
                "Prerender failed"
            ),
        }
        result
    }

    /// Evaluate a JavaScript expression in a pooled context.
    pub async fn eval_js(
        &self,
        expression: &str,
        options: &RenderOptions,
    ) -> Result<EvalResult, RenderFault> {
        let script = build_eval_script(expression, options);

        if options.trace {
            tracing::debug!(script = %script, "Generated eval script");
        }

        let raw = self.executor.execute(&script).await.map_err(|e| {
            tracing::error!(error = %e, "Evaluation failed");
            RenderFault::from_execution(
                EVAL_COMPONENT_NAME,
                &serde_json::Value::Null,
                e,
                script.as_str(),
                &self.sanitizer,
            )
        })?;

        interpret_eval(raw, options, &script, &self.sanitizer)
    }
}
