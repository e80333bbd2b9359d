//! Rendering options and their one-time resolution against defaults.

use std::env;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fallback values used when a caller leaves an option unset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderDefaults {
    pub prerender: bool,
    pub trace: bool,
    pub replay_console: bool,
    pub raise_on_error: bool,
    pub throw_js_errors: bool,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            prerender: true,
            trace: false,
            replay_console: true,
            raise_on_error: false,
            throw_js_errors: false,
        }
    }
}

impl RenderDefaults {
    /// Load defaults from environment variables.
    ///
    /// Environment variables:
    /// - `SSR_PRERENDER` (default: true)
    /// - `SSR_TRACE` (default: false)
    /// - `SSR_REPLAY_CONSOLE` (default: true)
    /// - `SSR_RAISE_ON_ERROR` (default: false)
    /// - `SSR_THROW_JS_ERRORS` (default: false)
    pub fn from_env() -> Self {
        let fallback = Self::default();
        Self {
            prerender: env_flag("SSR_PRERENDER").unwrap_or(fallback.prerender),
            trace: env_flag("SSR_TRACE").unwrap_or(fallback.trace),
            replay_console: env_flag("SSR_REPLAY_CONSOLE").unwrap_or(fallback.replay_console),
            raise_on_error: env_flag("SSR_RAISE_ON_ERROR").unwrap_or(fallback.raise_on_error),
            throw_js_errors: env_flag("SSR_THROW_JS_ERRORS").unwrap_or(fallback.throw_js_errors),
        }
    }
}

/// Parse a boolean environment variable. Unknown values are ignored.
pub(crate) fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Options as supplied by the caller, every field optional.
///
/// Deserializes from the camelCase keys used by view layers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptionOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerender: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_console: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raise_on_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throw_js_errors: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_options: Option<Map<String, Value>>,
}

impl RenderOptionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prerender(mut self, prerender: bool) -> Self {
        self.prerender = Some(prerender);
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_replay_console(mut self, replay_console: bool) -> Self {
        self.replay_console = Some(replay_console);
        self
    }

    pub fn with_raise_on_error(mut self, raise_on_error: bool) -> Self {
        self.raise_on_error = Some(raise_on_error);
        self
    }

    pub fn with_throw_js_errors(mut self, throw_js_errors: bool) -> Self {
        self.throw_js_errors = Some(throw_js_errors);
        self
    }

    pub fn with_dom_id(mut self, dom_id: impl Into<String>) -> Self {
        self.dom_id = Some(dom_id.into());
        self
    }

    pub fn with_html_options(mut self, html_options: Map<String, Value>) -> Self {
        self.html_options = Some(html_options);
        self
    }
}

/// Fully resolved rendering options.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    pub prerender: bool,
    pub trace: bool,
    pub replay_console: bool,
    pub raise_on_error: bool,
    pub throw_js_errors: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_id: Option<String>,
    pub html_options: Map<String, Value>,
}

impl RenderOptions {
    /// Layer caller overrides over defaults.
    pub fn resolve(overrides: RenderOptionOverrides, defaults: &RenderDefaults) -> Self {
        Self {
            prerender: overrides.prerender.unwrap_or(defaults.prerender),
            trace: overrides.trace.unwrap_or(defaults.trace),
            replay_console: overrides.replay_console.unwrap_or(defaults.replay_console),
            raise_on_error: overrides.raise_on_error.unwrap_or(defaults.raise_on_error),
            throw_js_errors: overrides.throw_js_errors.unwrap_or(defaults.throw_js_errors),
            dom_id: overrides.dom_id.filter(|id| !id.trim().is_empty()),
            html_options: overrides.html_options.unwrap_or_default(),
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::resolve(RenderOptionOverrides::default(), &RenderDefaults::default())
    }
}
