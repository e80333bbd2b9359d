//! Validated render request.

use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, SsrCoreError, MAX_PROPS_SIZE};
use crate::options::{RenderDefaults, RenderOptionOverrides, RenderOptions};

/// Immutable description of one render call.
///
/// Options are resolved exactly once, here. Props are kept both as a value
/// (for sanitized error reporting) and as the JSON text embedded in scripts.
#[derive(Clone, Debug)]
pub struct RenderRequest {
    component_name: String,
    props: Value,
    props_json: String,
    options: RenderOptions,
}

impl RenderRequest {
    /// Build and validate a request.
    ///
    /// `props` may be an object or array, or a string holding pre-serialized
    /// JSON of one. The string form is embedded verbatim.
    pub fn new(
        component_name: impl Into<String>,
        props: Value,
        overrides: RenderOptionOverrides,
        defaults: &RenderDefaults,
    ) -> Result<Self> {
        let component_name = component_name.into();
        if component_name.trim().is_empty() {
            return Err(SsrCoreError::BlankComponentName);
        }

        let (props, props_json) = normalize_props(props)?;

        if props_json.len() > MAX_PROPS_SIZE {
            return Err(SsrCoreError::PayloadTooLarge {
                size: props_json.len(),
                max: MAX_PROPS_SIZE,
            });
        }

        let mut options = RenderOptions::resolve(overrides, defaults);
        if options.dom_id.is_none() {
            options.dom_id = Some(generate_dom_id(&component_name));
        }

        Ok(Self {
            component_name,
            props,
            props_json,
            options,
        })
    }

    /// Request with default options.
    pub fn with_defaults(component_name: impl Into<String>, props: Value) -> Result<Self> {
        Self::new(
            component_name,
            props,
            RenderOptionOverrides::default(),
            &RenderDefaults::default(),
        )
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    pub fn props(&self) -> &Value {
        &self.props
    }

    /// Props as JSON text, unescaped.
    pub fn props_json(&self) -> &str {
        &self.props_json
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// DOM id of the component's container. Always present after construction.
    pub fn dom_id(&self) -> &str {
        self.options.dom_id.as_deref().unwrap_or_default()
    }
}

fn normalize_props(props: Value) -> Result<(Value, String)> {
    match props {
        Value::String(text) => {
            let parsed: Value = serde_json::from_str(&text)
                .map_err(|e| SsrCoreError::InvalidProps(format!("props string is not JSON: {e}")))?;
            if !is_structured(&parsed) {
                return Err(SsrCoreError::InvalidProps(
                    "props string must encode an object or array".to_string(),
                ));
            }
            Ok((parsed, text))
        }
        value if is_structured(&value) => {
            let json = serde_json::to_string(&value)
                .map_err(|e| SsrCoreError::Serialization(e.to_string()))?;
            Ok((value, json))
        }
        other => Err(SsrCoreError::InvalidProps(format!(
            "props must be an object, array or JSON string, got {}",
            kind_of(&other)
        ))),
    }
}

fn is_structured(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn generate_dom_id(component_name: &str) -> String {
    format!("{component_name}-react-component-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_valid_request() {
        let request = RenderRequest::with_defaults("Greeter", json!({"name": "Ada"})).unwrap();
        assert_eq!(request.component_name(), "Greeter");
        assert_eq!(request.props_json(), r#"{"name":"Ada"}"#);
        assert!(request.options().prerender);
    }

    #[test]
    fn test_blank_component_name() {
        let result = RenderRequest::with_defaults("  ", json!({}));
        assert!(matches!(result, Err(SsrCoreError::BlankComponentName)));
    }

    #[test]
    fn test_scalar_props_rejected() {
        for props in [json!(42), json!(true), json!(null)] {
            let result = RenderRequest::with_defaults("Greeter", props);
            assert!(matches!(result, Err(SsrCoreError::InvalidProps(_))));
        }
    }

    #[test]
    fn test_string_props_kept_verbatim() {
        let raw = r#"{ "name" : "Ada" }"#;
        let request = RenderRequest::with_defaults("Greeter", json!(raw)).unwrap();
        assert_eq!(request.props_json(), raw);
        assert_eq!(request.props()["name"], json!("Ada"));
    }

    #[test]
    fn test_string_props_must_be_json() {
        let result = RenderRequest::with_defaults("Greeter", json!("not json"));
        assert!(matches!(result, Err(SsrCoreError::InvalidProps(_))));

        let result = RenderRequest::with_defaults("Greeter", json!("\"just a string\""));
        assert!(matches!(result, Err(SsrCoreError::InvalidProps(_))));
    }

    #[test]
    fn test_props_too_large() {
        let large = "x".repeat(MAX_PROPS_SIZE + 1);
        let result = RenderRequest::with_defaults("Greeter", json!({ "large": large }));
        assert!(matches!(result, Err(SsrCoreError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_dom_id_generated_when_missing() {
        let request = RenderRequest::with_defaults("Greeter", json!({})).unwrap();
        assert!(request.dom_id().starts_with("Greeter-react-component-"));

        let request = RenderRequest::new(
            "Greeter",
            json!({}),
            RenderOptionOverrides::new().with_dom_id("greeter"),
            &RenderDefaults::default(),
        )
        .unwrap();
        assert_eq!(request.dom_id(), "greeter");
    }
}
