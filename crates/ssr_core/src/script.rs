//! Pure script generation.
//!
//! Every generated script is a single expression that evaluates to a JSON
//! string. Faults raised by component code, including output that cannot be
//! serialized, are caught inside the script and reported in-band
//! (`hasErrors` / `renderingError`) unless the request asks for them to be
//! rethrown.

use std::borrow::Cow;
use std::fmt;

use serde_json::Value;

use crate::options::RenderOptions;
use crate::prelude::{CallingConvention, REGISTRY_GLOBAL};
use crate::request::RenderRequest;

/// Which result shape a script produces when evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptKind {
    /// `{html, consoleReplayScript, hasErrors, renderingError}`
    Render,
    /// `{html, consoleLogScript, hasErrors, renderingError}`
    Eval,
}

/// An executable script. Opaque to everything but the execution pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedScript {
    kind: ScriptKind,
    source: String,
}

impl GeneratedScript {
    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn into_string(self) -> String {
        self.source
    }
}

impl fmt::Display for GeneratedScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Replace U+2028 and U+2029 with their `\uXXXX` escapes.
///
/// Both are valid inside JSON strings but terminate lines in older
/// JavaScript grammars.
pub fn escape_line_separators(text: &str) -> Cow<'_, str> {
    if text.contains(['\u{2028}', '\u{2029}']) {
        Cow::Owned(text.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Quote `text` as a JavaScript string literal.
pub fn js_string_literal(text: &str) -> String {
    let quoted = Value::String(text.to_owned()).to_string();
    escape_line_separators(&quoted).into_owned()
}

/// Build the script that renders one component.
///
/// Order inside the guarded block: clear hydrated stores, run the hydration
/// script, invoke the component with the calling convention it was
/// registered with, then serialize the envelope.
pub fn build_render_script(
    request: &RenderRequest,
    rails_context: &Value,
    hydration_script: &str,
) -> GeneratedScript {
    let options = request.options();
    let registry = REGISTRY_GLOBAL;
    let render_function = CallingConvention::RenderFunction.js_tag();
    let rails_context = rails_context.to_string();
    let rails_context = escape_line_separators(&rails_context);
    let props = escape_line_separators(request.props_json());
    let component_name = js_string_literal(request.component_name());
    let dom_node_id = js_string_literal(request.dom_id());
    let rethrow = rethrow_clause(options);
    let trace = if options.trace {
        format!(
            "console.log({});",
            js_string_literal(&format!(
                "RENDERED {} to dom node with id: {}",
                request.component_name(),
                request.dom_id()
            ))
        )
    } else {
        String::new()
    };

    let source = format!(
        r#"(function() {{
  console.history = [];
  var railsContext = {rails_context};
  var componentName = {component_name};
  var domNodeId = {dom_node_id};
  var props = {props};
  function envelope(html, hasErrors, renderingError) {{
    return JSON.stringify({{
      html: html,
      consoleReplayScript: {registry}.buildConsoleReplay(),
      hasErrors: hasErrors,
      renderingError: renderingError
    }});
  }}
  try {{
    {registry}.clearHydratedStores();
{hydration_script}
    var entry = {registry}.get(componentName);
    var output = entry.convention === '{render_function}'
      ? entry.component(props, railsContext)
      : entry.component(props);
    var htmlResult = {registry}.toHtml(output);
    {trace}
    return envelope(htmlResult, false, {{}});
  }} catch (e) {{
    {rethrow}
    var renderingError = {registry}.describeError(e);
    return envelope({registry}.errorHtml(componentName, renderingError), true, renderingError);
  }}
}})()"#
    );

    GeneratedScript {
        kind: ScriptKind::Render,
        source,
    }
}

/// Build the script that evaluates an arbitrary expression.
///
/// Non-string results are JSON encoded; `undefined` becomes the empty string.
pub fn build_eval_script(expression: &str, options: &RenderOptions) -> GeneratedScript {
    let registry = REGISTRY_GLOBAL;
    let rethrow = rethrow_clause(options);

    let source = format!(
        r#"(function() {{
  console.history = [];
  function envelope(html, hasErrors, renderingError) {{
    return JSON.stringify({{
      html: html,
      consoleLogScript: {registry}.buildConsoleReplay(),
      hasErrors: hasErrors,
      renderingError: renderingError
    }});
  }}
  try {{
    var htmlResult = (function() {{
      return (
{expression}
      );
    }})();
    if (typeof htmlResult !== 'string') {{
      htmlResult = htmlResult === undefined ? '' : JSON.stringify(htmlResult);
    }}
    return envelope(htmlResult, false, {{}});
  }} catch (e) {{
    {rethrow}
    return envelope('', true, {registry}.describeError(e));
  }}
}})()"#
    );

    GeneratedScript {
        kind: ScriptKind::Eval,
        source,
    }
}

fn rethrow_clause(options: &RenderOptions) -> &'static str {
    if options.throw_js_errors {
        "throw e;"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::options::{RenderDefaults, RenderOptionOverrides};

    fn request(overrides: RenderOptionOverrides, props: Value) -> RenderRequest {
        RenderRequest::new("Greeter", props, overrides, &RenderDefaults::default()).unwrap()
    }

    #[test]
    fn test_escape_line_separators() {
        assert_eq!(escape_line_separators("plain"), "plain");
        assert!(matches!(escape_line_separators("plain"), Cow::Borrowed(_)));
        assert_eq!(
            escape_line_separators("a\u{2028}b\u{2029}c"),
            "a\\u2028b\\u2029c"
        );
    }

    #[test]
    fn test_props_line_separators_escaped() {
        let req = request(
            RenderOptionOverrides::new(),
            json!({ "text": "line\u{2028}para\u{2029}end" }),
        );
        let script = build_render_script(&req, &json!({}), "");
        assert!(!script.as_str().contains('\u{2028}'));
        assert!(!script.as_str().contains('\u{2029}'));
        assert!(script.as_str().contains(r#"line\u2028para\u2029end"#));
    }

    #[test]
    fn test_string_props_embedded_verbatim() {
        let req = request(RenderOptionOverrides::new(), json!(r#"{"html":"<b>&</b>"}"#));
        let script = build_render_script(&req, &json!({}), "");
        assert!(script.as_str().contains(r#"var props = {"html":"<b>&</b>"};"#));
    }

    #[test]
    fn test_render_script_order() {
        let req = request(RenderOptionOverrides::new(), json!({}));
        let script = build_render_script(&req, &json!({}), "    // HYDRATION\n");
        let source = script.as_str();

        let clear = source.find(".clearHydratedStores()").unwrap();
        let hydration = source.find("// HYDRATION").unwrap();
        let render = source.find("entry.component(props, railsContext)").unwrap();
        assert!(clear < hydration);
        assert!(hydration < render);
        assert_eq!(script.kind(), ScriptKind::Render);
    }

    #[test]
    fn test_render_script_calling_conventions() {
        let req = request(RenderOptionOverrides::new(), json!({}));
        let script = build_render_script(&req, &json!({}), "");
        assert!(script
            .as_str()
            .contains("entry.convention === 'renderFunction'"));
        assert!(script.as_str().contains(": entry.component(props);"));
    }

    #[test]
    fn test_render_script_rethrow_only_when_requested() {
        let req = request(RenderOptionOverrides::new(), json!({}));
        assert!(!build_render_script(&req, &json!({}), "")
            .as_str()
            .contains("throw e;"));

        let req = request(RenderOptionOverrides::new().with_throw_js_errors(true), json!({}));
        assert!(build_render_script(&req, &json!({}), "")
            .as_str()
            .contains("throw e;"));
    }

    #[test]
    fn test_render_script_trace() {
        let req = request(
            RenderOptionOverrides::new()
                .with_trace(true)
                .with_dom_id("greeter-1"),
            json!({}),
        );
        let script = build_render_script(&req, &json!({}), "");
        assert!(script
            .as_str()
            .contains(r#"console.log("RENDERED Greeter to dom node with id: greeter-1");"#));
    }

    #[test]
    fn test_render_script_embeds_context_and_console_replay() {
        let req = request(RenderOptionOverrides::new(), json!({}));
        let script = build_render_script(&req, &json!({ "railsEnv": "test" }), "");
        assert!(script
            .as_str()
            .contains(r#"var railsContext = {"railsEnv":"test"};"#));
        assert!(script.as_str().contains("consoleReplayScript:"));
        assert!(script.as_str().contains("console.history = [];"));
    }

    #[test]
    fn test_component_name_is_quoted() {
        let req = RenderRequest::with_defaults("Evil\"); alert(1); (\"", json!({})).unwrap();
        let script = build_render_script(&req, &json!({}), "");
        assert!(script
            .as_str()
            .contains(r#"var componentName = "Evil\"); alert(1); (\"";"#));
    }

    #[test]
    fn test_eval_script_shape() {
        let script = build_eval_script("1 + 1", &RenderOptions::default());
        assert_eq!(script.kind(), ScriptKind::Eval);
        assert!(script.as_str().contains("consoleLogScript:"));
        assert!(script.as_str().contains("\n1 + 1\n"));
        assert!(!script.as_str().contains("throw e;"));
    }

    #[test]
    fn test_envelope_serialized_inside_guard() {
        let req = request(RenderOptionOverrides::new(), json!({}));
        let render = build_render_script(&req, &json!({}), "");
        let eval = build_eval_script("1 + 1", &RenderOptions::default());

        for source in [render.as_str(), eval.as_str()] {
            let guard = source.find("try {").unwrap();
            let success = source.find("return envelope(htmlResult, false, {});").unwrap();
            let catch = source.find("} catch (e) {").unwrap();
            assert!(guard < success);
            assert!(success < catch);
            assert!(!source[guard..].contains("JSON.stringify({"));
        }
    }
}
