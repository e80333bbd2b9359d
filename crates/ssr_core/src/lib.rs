//! Pure SSR logic - no I/O, no async, no side effects.
//!
//! This crate provides:
//! - Validated render requests and option resolution
//! - Script generation for component rendering and expression evaluation
//! - Per-response rails context and store hydration
//! - Interpretation of execution output into results and faults
//! - The JavaScript prelude installed in every execution context
//!
//! # Example
//!
//! ```
//! use ssrkit_core::{build_render_script, RenderRequest, RequestInfo, ResponseScope};
//!
//! let request = RenderRequest::with_defaults(
//!     "Greeter",
//!     serde_json::json!({ "name": "Ada" }),
//! ).unwrap();
//!
//! let mut scope = ResponseScope::new(RequestInfo::new("production"));
//! let hydration = scope.hydration_script();
//! let context = scope.rails_context(true).unwrap();
//!
//! let script = build_render_script(&request, &context, &hydration);
//! assert!(script.as_str().contains("Greeter"));
//! ```

mod config;
mod context;
mod error;
mod html;
mod hydration;
mod options;
mod prelude;
mod request;
mod result;
mod sanitize;
mod script;

pub use config::SsrPoolConfig;
pub use context::{
    RailsContext, RequestInfo, ResponseScope, RAILS_CONTEXT_DOM_ID, STORE_DATA_ATTRIBUTE,
};
pub use error::{Result, SsrCoreError, MAX_PROPS_SIZE};
pub use html::{json_escape, json_script_tag};
pub use hydration::{build_hydration_script, HydrationQueue, PendingStoreHydration, StoreHydration};
pub use options::{RenderDefaults, RenderOptionOverrides, RenderOptions};
pub use prelude::{generate_prelude, CallingConvention, REGISTRY_GLOBAL};
pub use request::RenderRequest;
pub use result::{
    interpret_eval, interpret_render, EvalResult, FaultCause, OutputError, RenderFault,
    RenderPayload, RenderResult, RenderingError, COMPONENT_HTML_KEY, EVAL_COMPONENT_NAME,
};
pub use sanitize::{PropsSanitizer, FILTERED};
pub use script::{
    build_eval_script, build_render_script, escape_line_separators, js_string_literal,
    GeneratedScript, ScriptKind,
};
