//! Interpretation of execution output into typed results and faults.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::options::RenderOptions;
use crate::request::RenderRequest;
use crate::sanitize::PropsSanitizer;
use crate::script::GeneratedScript;

/// Key holding the main markup of a structured (hash) render result.
pub const COMPONENT_HTML_KEY: &str = "componentHtml";

/// Component name reported for faults raised by expression evaluation.
pub const EVAL_COMPONENT_NAME: &str = "<eval>";

/// Error reported in-band by a generated script.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderingError {
    pub message: String,
    #[serde(default)]
    pub stack: String,
}

/// Markup produced by a render.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderPayload {
    StringHtml(String),
    /// `componentHtml` plus auxiliary named fragments.
    StructuredHtml(BTreeMap<String, String>),
}

impl RenderPayload {
    /// The component's main markup.
    pub fn component_html(&self) -> &str {
        match self {
            RenderPayload::StringHtml(html) => html,
            RenderPayload::StructuredHtml(map) => map
                .get(COMPONENT_HTML_KEY)
                .map(String::as_str)
                .unwrap_or_default(),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, RenderPayload::StructuredHtml(_))
    }
}

/// Typed result of a component render.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderResult {
    pub payload: RenderPayload,
    pub console_replay_script: String,
    pub has_errors: bool,
    pub rendering_error: Option<RenderingError>,
}

impl RenderResult {
    /// Result of a render that was not prerendered.
    pub fn empty() -> Self {
        Self {
            payload: RenderPayload::StringHtml(String::new()),
            console_replay_script: String::new(),
            has_errors: false,
            rendering_error: None,
        }
    }
}

/// Typed result of an expression evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalResult {
    pub html: String,
    pub console_log_script: String,
    pub has_errors: bool,
    pub rendering_error: Option<RenderingError>,
}

/// Output that parsed as JSON but not as the expected result shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("Execution output does not match the result shape: {0}")]
    Shape(String),

    #[error("Structured render output is missing \"componentHtml\"")]
    MissingComponentHtml,

    #[error("Structured render output field \"{0}\" is not a string")]
    NonStringFragment(String),
}

/// What caused a [`RenderFault`].
#[derive(Debug)]
pub enum FaultCause {
    /// Error caught inside the script and reported in-band.
    Js(RenderingError),
    /// Fault at the pool boundary: evaluation escaped the script, the
    /// context could not be built, or the output could not be parsed.
    Execution(Box<dyn std::error::Error + Send + Sync>),
}

impl FaultCause {
    pub fn message(&self) -> String {
        match self {
            FaultCause::Js(error) => error.message.clone(),
            FaultCause::Execution(error) => error.to_string(),
        }
    }
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultCause::Js(error) => write!(f, "{}", error.message),
            FaultCause::Execution(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for FaultCause {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FaultCause::Js(_) => None,
            FaultCause::Execution(error) => Some(error.as_ref()),
        }
    }
}

/// A failed prerender, with what is needed to reproduce it.
///
/// Props are sanitized before they are stored here.
#[derive(Error, Debug)]
#[error("Prerender error in {component_name}: {}", describe_cause(.cause))]
pub struct RenderFault {
    pub component_name: String,
    pub sanitized_props: String,
    #[source]
    pub cause: Option<FaultCause>,
    pub script: String,
    pub console_messages: String,
}

fn describe_cause(cause: &Option<FaultCause>) -> String {
    cause
        .as_ref()
        .map(FaultCause::message)
        .unwrap_or_else(|| "unknown error".to_string())
}

impl RenderFault {
    /// Fault for an in-band error flag.
    pub fn from_js(
        component_name: &str,
        props: &Value,
        error: Option<RenderingError>,
        script: &str,
        console_messages: String,
        sanitizer: &PropsSanitizer,
    ) -> Self {
        Self {
            component_name: component_name.to_string(),
            sanitized_props: sanitizer.sanitize(props),
            cause: error.map(FaultCause::Js),
            script: script.to_string(),
            console_messages,
        }
    }

    /// Fault for anything that went wrong at the pool boundary.
    pub fn from_execution(
        component_name: &str,
        props: &Value,
        error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
        script: &str,
        sanitizer: &PropsSanitizer,
    ) -> Self {
        Self {
            component_name: component_name.to_string(),
            sanitized_props: sanitizer.sanitize(props),
            cause: Some(FaultCause::Execution(error.into())),
            script: script.to_string(),
            console_messages: String::new(),
        }
    }

    /// The in-band JS error, if that is what caused the fault.
    pub fn js_error(&self) -> Option<&RenderingError> {
        match &self.cause {
            Some(FaultCause::Js(error)) => Some(error),
            _ => None,
        }
    }

    pub fn is_execution_fault(&self) -> bool {
        matches!(self.cause, Some(FaultCause::Execution(_)))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRenderOutput {
    #[serde(default)]
    html: Value,
    #[serde(default)]
    console_replay_script: String,
    #[serde(default)]
    has_errors: bool,
    #[serde(default)]
    rendering_error: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvalOutput {
    #[serde(default)]
    html: String,
    #[serde(default)]
    console_log_script: String,
    #[serde(default)]
    has_errors: bool,
    #[serde(default)]
    rendering_error: Value,
}

/// `{}` and `null` mean no error.
fn parse_rendering_error(value: Value) -> Option<RenderingError> {
    let has_message = value
        .as_object()
        .is_some_and(|map| map.contains_key("message"));
    if has_message {
        serde_json::from_value(value).ok()
    } else {
        None
    }
}

fn parse_payload(html: Value) -> Result<RenderPayload, OutputError> {
    match html {
        Value::Null => Ok(RenderPayload::StringHtml(String::new())),
        Value::String(html) => Ok(RenderPayload::StringHtml(html)),
        Value::Object(map) => {
            if !map.contains_key(COMPONENT_HTML_KEY) {
                return Err(OutputError::MissingComponentHtml);
            }
            map.into_iter()
                .map(|(key, value)| match value {
                    Value::String(fragment) => Ok((key, fragment)),
                    _ => Err(OutputError::NonStringFragment(key)),
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(RenderPayload::StructuredHtml)
        }
        other => Err(OutputError::Shape(format!(
            "html must be a string or object, got {other}"
        ))),
    }
}

/// Turn the parsed output of a render script into a result or a fault.
pub fn interpret_render(
    raw: Value,
    request: &RenderRequest,
    script: &GeneratedScript,
    sanitizer: &PropsSanitizer,
) -> Result<RenderResult, RenderFault> {
    let execution_fault = |error: OutputError| {
        RenderFault::from_execution(
            request.component_name(),
            request.props(),
            error,
            script.as_str(),
            sanitizer,
        )
    };

    let output: RawRenderOutput =
        serde_json::from_value(raw).map_err(|e| execution_fault(OutputError::Shape(e.to_string())))?;
    let rendering_error = parse_rendering_error(output.rendering_error);
    let options = request.options();

    if output.has_errors && options.raise_on_error {
        return Err(RenderFault::from_js(
            request.component_name(),
            request.props(),
            rendering_error,
            script.as_str(),
            output.console_replay_script,
            sanitizer,
        ));
    }

    let payload = parse_payload(output.html).map_err(execution_fault)?;

    Ok(RenderResult {
        payload,
        console_replay_script: if options.replay_console {
            output.console_replay_script
        } else {
            String::new()
        },
        has_errors: output.has_errors,
        rendering_error,
    })
}

/// Turn the parsed output of an evaluation script into a result or a fault.
pub fn interpret_eval(
    raw: Value,
    options: &RenderOptions,
    script: &GeneratedScript,
    sanitizer: &PropsSanitizer,
) -> Result<EvalResult, RenderFault> {
    let output: RawEvalOutput = serde_json::from_value(raw).map_err(|e| {
        RenderFault::from_execution(
            EVAL_COMPONENT_NAME,
            &Value::Null,
            OutputError::Shape(e.to_string()),
            script.as_str(),
            sanitizer,
        )
    })?;
    let rendering_error = parse_rendering_error(output.rendering_error);

    if output.has_errors && options.raise_on_error {
        return Err(RenderFault::from_js(
            EVAL_COMPONENT_NAME,
            &Value::Null,
            rendering_error,
            script.as_str(),
            output.console_log_script,
            sanitizer,
        ));
    }

    Ok(EvalResult {
        html: output.html,
        console_log_script: if options.replay_console {
            output.console_log_script
        } else {
            String::new()
        },
        has_errors: output.has_errors,
        rendering_error,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::options::{RenderDefaults, RenderOptionOverrides};
    use crate::script::{build_eval_script, build_render_script};

    fn greeter(overrides: RenderOptionOverrides) -> (RenderRequest, GeneratedScript) {
        let request = RenderRequest::new(
            "Greeter",
            json!({ "name": "Ada", "secret": "do-not-leak" }),
            overrides,
            &RenderDefaults::default(),
        )
        .unwrap();
        let script = build_render_script(&request, &json!({}), "");
        (request, script)
    }

    #[test]
    fn test_success_passes_payload_through() {
        let (request, script) = greeter(RenderOptionOverrides::new());
        let raw = json!({
            "html": "<div>Hi Ada</div>",
            "consoleReplayScript": "",
            "hasErrors": false
        });
        let result = interpret_render(raw, &request, &script, &PropsSanitizer::default()).unwrap();
        assert_eq!(
            result.payload,
            RenderPayload::StringHtml("<div>Hi Ada</div>".to_string())
        );
        assert_eq!(result.console_replay_script, "");
        assert!(!result.has_errors);
        assert!(result.rendering_error.is_none());
    }

    #[test]
    fn test_errors_without_raise_are_returned() {
        let (request, script) = greeter(RenderOptionOverrides::new());
        let raw = json!({
            "html": "<pre>boom</pre>",
            "consoleReplayScript": "<script>console.error('x')</script>",
            "hasErrors": true,
            "renderingError": { "message": "boom", "stack": "at Greeter" }
        });
        let result = interpret_render(raw, &request, &script, &PropsSanitizer::default()).unwrap();
        assert!(result.has_errors);
        let error = result.rendering_error.unwrap();
        assert_eq!(error.message, "boom");
        assert_eq!(error.stack, "at Greeter");
    }

    #[test]
    fn test_errors_with_raise_produce_fault() {
        let (request, script) =
            greeter(RenderOptionOverrides::new().with_raise_on_error(true));
        let raw = json!({
            "html": "",
            "consoleReplayScript": "console.log('captured')",
            "hasErrors": true,
            "renderingError": { "message": "boom" }
        });
        let fault = interpret_render(raw, &request, &script, &PropsSanitizer::default()).unwrap_err();
        assert_eq!(fault.component_name, "Greeter");
        assert_eq!(fault.js_error().unwrap().message, "boom");
        assert!(!fault.sanitized_props.contains("do-not-leak"));
        assert!(fault.sanitized_props.contains("Ada"));
        assert_eq!(fault.script, script.as_str());
        assert_eq!(fault.console_messages, "console.log('captured')");
        assert!(!fault.is_execution_fault());
        assert_eq!(fault.to_string(), "Prerender error in Greeter: boom");
    }

    #[test]
    fn test_structured_payload() {
        let (request, script) = greeter(RenderOptionOverrides::new());
        let raw = json!({
            "html": { "componentHtml": "<div/>", "title": "<title>Hi</title>" },
            "consoleReplayScript": "",
            "hasErrors": false,
            "renderingError": {}
        });
        let result = interpret_render(raw, &request, &script, &PropsSanitizer::default()).unwrap();
        assert!(result.payload.is_structured());
        assert_eq!(result.payload.component_html(), "<div/>");
        match result.payload {
            RenderPayload::StructuredHtml(map) => assert_eq!(map["title"], "<title>Hi</title>"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_structured_payload_requires_component_html() {
        let (request, script) = greeter(RenderOptionOverrides::new());
        let raw = json!({ "html": { "title": "x" }, "hasErrors": false });
        let fault = interpret_render(raw, &request, &script, &PropsSanitizer::default()).unwrap_err();
        assert!(fault.is_execution_fault());
        assert!(fault.to_string().contains("componentHtml"));
    }

    #[test]
    fn test_shape_mismatch_is_execution_fault() {
        let (request, script) = greeter(RenderOptionOverrides::new());
        let fault = interpret_render(json!([1, 2]), &request, &script, &PropsSanitizer::default())
            .unwrap_err();
        assert!(fault.is_execution_fault());
        assert!(!fault.sanitized_props.contains("do-not-leak"));
    }

    #[test]
    fn test_replay_console_disabled_blanks_script() {
        let (request, script) =
            greeter(RenderOptionOverrides::new().with_replay_console(false));
        let raw = json!({ "html": "<p/>", "consoleReplayScript": "console.log(1)", "hasErrors": false });
        let result = interpret_render(raw, &request, &script, &PropsSanitizer::default()).unwrap();
        assert_eq!(result.console_replay_script, "");
    }

    #[test]
    fn test_eval_result() {
        let options = RenderOptions::default();
        let script = build_eval_script("'ok'", &options);
        let raw = json!({ "html": "ok", "consoleLogScript": "", "hasErrors": false, "renderingError": {} });
        let result = interpret_eval(raw, &options, &script, &PropsSanitizer::default()).unwrap();
        assert_eq!(result.html, "ok");
        assert!(!result.has_errors);
    }

    #[test]
    fn test_eval_raise() {
        let options = RenderOptions {
            raise_on_error: true,
            ..RenderOptions::default()
        };
        let script = build_eval_script("missing()", &options);
        let raw = json!({
            "html": "",
            "consoleLogScript": "",
            "hasErrors": true,
            "renderingError": { "message": "missing is not defined", "stack": "" }
        });
        let fault = interpret_eval(raw, &options, &script, &PropsSanitizer::default()).unwrap_err();
        assert_eq!(fault.component_name, EVAL_COMPONENT_NAME);
        assert_eq!(fault.js_error().unwrap().message, "missing is not defined");
    }

    #[test]
    fn test_from_execution_keeps_source() {
        let (request, script) = greeter(RenderOptionOverrides::new());
        let fault = RenderFault::from_execution(
            request.component_name(),
            request.props(),
            OutputError::MissingComponentHtml,
            script.as_str(),
            &PropsSanitizer::default(),
        );
        let source = std::error::Error::source(&fault).unwrap();
        assert!(source.to_string().contains("componentHtml"));
    }
}
