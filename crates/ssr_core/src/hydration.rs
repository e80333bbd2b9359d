//! Store hydration queued for the next render.

use serde_json::Value;

use crate::error::{Result, SsrCoreError};
use crate::prelude::REGISTRY_GLOBAL;
use crate::script::{escape_line_separators, js_string_literal};

/// Which queue a store registration goes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HydrationQueue {
    Immediate,
    /// Flushed by a later call site of the same response.
    Deferred,
}

/// One store to hydrate before rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreHydration {
    store_name: String,
    props: Value,
    props_json: String,
}

impl StoreHydration {
    pub fn new(store_name: impl Into<String>, props: Value) -> Result<Self> {
        let store_name = store_name.into();
        if store_name.trim().is_empty() {
            return Err(SsrCoreError::BlankStoreName);
        }
        let props_json =
            serde_json::to_string(&props).map_err(|e| SsrCoreError::Serialization(e.to_string()))?;
        Ok(Self {
            store_name,
            props,
            props_json,
        })
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn props(&self) -> &Value {
        &self.props
    }

    pub fn props_json(&self) -> &str {
        &self.props_json
    }
}

/// Request-scoped store registrations awaiting embedding.
#[derive(Clone, Debug, Default)]
pub struct PendingStoreHydration {
    immediate: Vec<StoreHydration>,
    deferred: Vec<StoreHydration>,
}

impl PendingStoreHydration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, store: StoreHydration, queue: HydrationQueue) {
        match queue {
            HydrationQueue::Immediate => self.immediate.push(store),
            HydrationQueue::Deferred => self.deferred.push(store),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.immediate.is_empty() && self.deferred.is_empty()
    }

    pub fn len(&self) -> usize {
        self.immediate.len() + self.deferred.len()
    }

    /// Take every pending entry, immediate before deferred.
    pub fn drain(&mut self) -> Vec<StoreHydration> {
        let mut stores = std::mem::take(&mut self.immediate);
        stores.append(&mut self.deferred);
        stores
    }
}

/// Declarations and invocations hydrating `stores` in order.
///
/// Expects `railsContext` to be in scope where the script is embedded.
pub fn build_hydration_script(stores: &[StoreHydration]) -> String {
    if stores.is_empty() {
        return String::new();
    }

    let registry = REGISTRY_GLOBAL;
    let mut script = String::from("    var reduxProps, store, storeGenerator;\n");
    for store in stores {
        let name = js_string_literal(store.store_name());
        let props = escape_line_separators(store.props_json());
        script.push_str(&format!(
            "    reduxProps = {props};\n    storeGenerator = {registry}.getStoreGenerator({name});\n    store = storeGenerator(reduxProps, railsContext);\n    {registry}.setStore({name}, store);\n"
        ));
    }
    script
}
