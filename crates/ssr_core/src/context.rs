//! Per-response state: the rails context and store hydration.
//!
//! A [`ResponseScope`] lives exactly as long as one host response. It
//! memoizes the rails context, remembers whether the context tag has been
//! emitted, and owns the store hydration queues.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::{Result, SsrCoreError};
use crate::hydration::{build_hydration_script, HydrationQueue, PendingStoreHydration, StoreHydration};
use crate::html::json_script_tag;

/// DOM id of the rails context script tag.
pub const RAILS_CONTEXT_DOM_ID: &str = "js-react-on-rails-context";

/// Attribute carrying the store name on client-side store data tags.
pub const STORE_DATA_ATTRIBUTE: &str = "data-js-react-on-rails-store";

/// Ambient request data supplied by the host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub environment: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub default_locale: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
    #[serde(default)]
    pub in_mailer: bool,
    /// Custom key/values merged into the rails context.
    #[serde(default)]
    pub extensions: Map<String, Value>,
}

impl RequestInfo {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Self::default()
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = Some(locale.into());
        self
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    pub fn with_accept_language(mut self, accept_language: impl Into<String>) -> Self {
        self.accept_language = Some(accept_language.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}

/// Context passed as the second argument to render functions.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RailsContext {
    pub rails_env: String,
    pub in_mailer: bool,
    pub i18n_locale: Option<String>,
    pub i18n_default_locale: Option<String>,
    pub href: Option<String>,
    pub location: Option<String>,
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub pathname: Option<String>,
    pub search: Option<String>,
    pub http_accept_language: Option<String>,
    pub server_side: bool,
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

const RESERVED_KEYS: &[&str] = &[
    "railsEnv",
    "inMailer",
    "i18nLocale",
    "i18nDefaultLocale",
    "href",
    "location",
    "scheme",
    "host",
    "port",
    "pathname",
    "search",
    "httpAcceptLanguage",
    "serverSide",
];

impl RailsContext {
    /// Build the context from request data. URL parts are left empty when
    /// `href` is missing or unparsable.
    pub fn from_request(request: &RequestInfo, server_side: bool) -> Self {
        let url = request.href.as_deref().and_then(|href| Url::parse(href).ok());

        let extensions = request
            .extensions
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            rails_env: request.environment.clone(),
            in_mailer: request.in_mailer,
            i18n_locale: request.locale.clone(),
            i18n_default_locale: request.default_locale.clone(),
            href: request.href.clone(),
            location: url.as_ref().map(|u| match u.query() {
                Some(query) => format!("{}?{query}", u.path()),
                None => u.path().to_string(),
            }),
            scheme: url.as_ref().map(|u| u.scheme().to_string()),
            host: url.as_ref().and_then(|u| u.host_str().map(str::to_string)),
            port: url.as_ref().and_then(Url::port_or_known_default),
            pathname: url.as_ref().map(|u| u.path().to_string()),
            search: url.as_ref().and_then(|u| u.query().map(str::to_string)),
            http_accept_language: request.accept_language.clone(),
            server_side,
            extensions,
        }
    }
}

/// State owned by one host response.
#[derive(Clone, Debug)]
pub struct ResponseScope {
    request: RequestInfo,
    rails_context: Option<RailsContext>,
    rails_context_rendered: bool,
    pending_stores: PendingStoreHydration,
    hydrated_stores: Vec<StoreHydration>,
    deferred_unflushed: Vec<StoreHydration>,
}

impl ResponseScope {
    pub fn new(request: RequestInfo) -> Self {
        Self {
            request,
            rails_context: None,
            rails_context_rendered: false,
            pending_stores: PendingStoreHydration::new(),
            hydrated_stores: Vec::new(),
            deferred_unflushed: Vec::new(),
        }
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    fn memoized_context(&mut self) -> &RailsContext {
        let request = &self.request;
        self.rails_context
            .get_or_insert_with(|| RailsContext::from_request(request, true))
    }

    /// The rails context as seen from the server or the client.
    ///
    /// Computed once per scope; later calls differ only in `serverSide`.
    pub fn rails_context(&mut self, server_side: bool) -> Result<Value> {
        let mut context = self.memoized_context().clone();
        context.server_side = server_side;
        serde_json::to_value(&context).map_err(|e| SsrCoreError::Serialization(e.to_string()))
    }

    /// Client-side context tag. Returns `None` once the tag has been emitted
    /// for this response.
    pub fn rails_context_script_tag(&mut self) -> Result<Option<String>> {
        if self.rails_context_rendered {
            return Ok(None);
        }
        let context = self.rails_context(false)?;
        self.rails_context_rendered = true;
        Ok(Some(json_script_tag(
            "id",
            RAILS_CONTEXT_DOM_ID,
            &context.to_string(),
        )))
    }

    pub fn rails_context_rendered(&self) -> bool {
        self.rails_context_rendered
    }

    /// Queue a store for hydration before the next render.
    pub fn register_store(
        &mut self,
        store_name: impl Into<String>,
        props: Value,
        queue: HydrationQueue,
    ) -> Result<()> {
        let store = StoreHydration::new(store_name, props)?;
        if queue == HydrationQueue::Deferred {
            self.deferred_unflushed.push(store.clone());
        }
        self.pending_stores.register(store, queue);
        Ok(())
    }

    pub fn pending_stores(&self) -> &PendingStoreHydration {
        &self.pending_stores
    }

    /// Hydration script for the next generated render script.
    ///
    /// Pending entries are consumed here. Stores hydrated by an earlier render
    /// of this response are declared again first, since every render script
    /// clears hydrated stores before running.
    pub fn hydration_script(&mut self) -> String {
        let drained = self.pending_stores.drain();
        self.hydrated_stores.extend(drained);
        build_hydration_script(&self.hydrated_stores)
    }

    /// Client-side data tags for deferred stores, emitted once each.
    pub fn flush_deferred_store_tags(&mut self) -> Vec<String> {
        std::mem::take(&mut self.deferred_unflushed)
            .iter()
            .map(|store| {
                json_script_tag(STORE_DATA_ATTRIBUTE, store.store_name(), store.props_json())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request_info() -> RequestInfo {
        RequestInfo::new("production")
            .with_locale("en")
            .with_default_locale("en")
            .with_href("https://example.com:8443/calendar/1?view=week")
            .with_accept_language("en-US,en;q=0.9")
            .with_extension("tenant", json!("acme"))
    }

    #[test]
    fn test_rails_context_url_parts() {
        let context = RailsContext::from_request(&request_info(), true);
        assert_eq!(context.scheme.as_deref(), Some("https"));
        assert_eq!(context.host.as_deref(), Some("example.com"));
        assert_eq!(context.port, Some(8443));
        assert_eq!(context.pathname.as_deref(), Some("/calendar/1"));
        assert_eq!(context.search.as_deref(), Some("view=week"));
        assert_eq!(context.location.as_deref(), Some("/calendar/1?view=week"));
    }

    #[test]
    fn test_rails_context_serialization() {
        let mut scope = ResponseScope::new(request_info());
        let context = scope.rails_context(true).unwrap();
        assert_eq!(context["railsEnv"], json!("production"));
        assert_eq!(context["i18nLocale"], json!("en"));
        assert_eq!(context["httpAcceptLanguage"], json!("en-US,en;q=0.9"));
        assert_eq!(context["serverSide"], json!(true));
        assert_eq!(context["tenant"], json!("acme"));
    }

    #[test]
    fn test_rails_context_missing_href() {
        let context = RailsContext::from_request(&RequestInfo::new("test"), false);
        assert!(context.href.is_none());
        assert!(context.host.is_none());
        assert!(context.port.is_none());
    }

    #[test]
    fn test_extensions_cannot_override_reserved_keys() {
        let info = RequestInfo::new("production").with_extension("serverSide", json!("nope"));
        let mut scope = ResponseScope::new(info);
        assert_eq!(scope.rails_context(true).unwrap()["serverSide"], json!(true));
    }

    #[test]
    fn test_rails_context_idempotent_except_server_side() {
        let mut scope = ResponseScope::new(request_info());
        let first = scope.rails_context(true).unwrap();
        let second = scope.rails_context(true).unwrap();
        assert_eq!(first.to_string(), second.to_string());

        let mut client = scope.rails_context(false).unwrap();
        assert_eq!(client["serverSide"], json!(false));
        client["serverSide"] = json!(true);
        assert_eq!(client, first);
    }

    #[test]
    fn test_rails_context_tag_rendered_once() {
        let mut scope = ResponseScope::new(request_info());
        let tag = scope.rails_context_script_tag().unwrap().unwrap();
        assert!(tag.starts_with(r#"<script type="application/json" id="js-react-on-rails-context">"#));
        assert!(tag.contains(r#""serverSide":false"#));
        assert!(scope.rails_context_rendered());

        assert!(scope.rails_context_script_tag().unwrap().is_none());
        assert!(scope.rails_context_script_tag().unwrap().is_none());
    }

    #[test]
    fn test_hydration_order_across_queues() {
        let mut scope = ResponseScope::new(request_info());
        scope
            .register_store("A", json!({}), HydrationQueue::Immediate)
            .unwrap();
        scope
            .register_store("B", json!({}), HydrationQueue::Immediate)
            .unwrap();
        scope
            .register_store("C", json!({}), HydrationQueue::Deferred)
            .unwrap();

        let script = scope.hydration_script();
        let a = script.find(r#"getStoreGenerator("A")"#).unwrap();
        let b = script.find(r#"getStoreGenerator("B")"#).unwrap();
        let c = script.find(r#"getStoreGenerator("C")"#).unwrap();
        assert!(a < b && b < c);
        assert!(scope.pending_stores().is_empty());
    }

    #[test]
    fn test_hydrated_stores_redeclared_for_later_renders() {
        let mut scope = ResponseScope::new(request_info());
        scope
            .register_store("A", json!({}), HydrationQueue::Immediate)
            .unwrap();
        let first = scope.hydration_script();

        scope
            .register_store("B", json!({}), HydrationQueue::Immediate)
            .unwrap();
        let second = scope.hydration_script();

        assert!(!first.contains(r#""B""#));
        assert!(second.contains(r#"getStoreGenerator("A")"#));
        assert!(second.contains(r#"getStoreGenerator("B")"#));
    }

    #[test]
    fn test_flush_deferred_store_tags() {
        let mut scope = ResponseScope::new(request_info());
        scope
            .register_store("A", json!({}), HydrationQueue::Immediate)
            .unwrap();
        scope
            .register_store("C", json!({ "x": "</script>" }), HydrationQueue::Deferred)
            .unwrap();
        let _ = scope.hydration_script();

        let tags = scope.flush_deferred_store_tags();
        assert_eq!(tags.len(), 1);
        assert!(tags[0].contains(r#"data-js-react-on-rails-store="C""#));
        assert!(!tags[0].contains("</script></script>"));
        assert!(scope.flush_deferred_store_tags().is_empty());
    }

    #[test]
    fn test_request_info_deserializes() {
        let info: RequestInfo = serde_json::from_value(json!({
            "environment": "staging",
            "href": "http://localhost:3000/",
            "extensions": { "featureFlags": ["a"] }
        }))
        .unwrap();
        assert_eq!(info.environment, "staging");
        assert!(info.locale.is_none());
        assert_eq!(info.extensions["featureFlags"], json!(["a"]));
    }
}
