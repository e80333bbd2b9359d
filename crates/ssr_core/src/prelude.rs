//! JavaScript prelude installed once per execution context.
//!
//! The prelude runs before the server bundle. It provides the Web API
//! polyfills the bundle expects, a console that records history for replay,
//! and the component/store registry the generated scripts call into.

use crate::script::js_string_literal;

/// Global name of the registry object installed by the prelude.
pub const REGISTRY_GLOBAL: &str = "SsrRegistry";

/// How a registered component is invoked.
///
/// Recorded at registration time by the bundle, never inferred from the
/// function's arity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallingConvention {
    /// Called as `component(props)`; the return value goes through the
    /// registry's element renderer unless it is already HTML.
    Component,
    /// Called as `renderFunction(props, railsContext)`.
    RenderFunction,
}

impl CallingConvention {
    /// Tag stored on the registry entry.
    pub fn js_tag(self) -> &'static str {
        match self {
            CallingConvention::Component => "component",
            CallingConvention::RenderFunction => "renderFunction",
        }
    }
}

/// Generate the prelude for a context.
pub fn generate_prelude(node_env: &str) -> String {
    let node_env = js_string_literal(node_env);
    let registry = registry_source();

    format!(
        r#"
// Process shim (Node.js compatibility)
globalThis.process = {{
    env: {{ NODE_ENV: {node_env} }},
    nextTick: (fn) => queueMicrotask(fn),
}};

{CONSOLE_CAPTURE}
{TIMING_POLYFILLS}
{ENCODING_POLYFILLS}
{registry}
"#
    )
}

/// Console that records every call into `console.history`.
///
/// Generated scripts reset the history before evaluating and serialize it
/// afterwards, so nothing is printed on the server.
const CONSOLE_CAPTURE: &str = r#"
globalThis.console = (function () {
    const record = (level) => (...args) => {
        globalThis.console.history.push({ level, arguments: args });
    };
    return {
        history: [],
        log: record('log'),
        info: record('info'),
        warn: record('warn'),
        error: record('error'),
        debug: record('debug'),
    };
})();
"#;

const TIMING_POLYFILLS: &str = r#"
const ssrStartedAt = Date.now();
globalThis.performance = { now: () => Date.now() - ssrStartedAt };

// React schedules work through MessageChannel; deliver messages as microtasks.
globalThis.MessageChannel = class {
    constructor() {
        const port = () => ({ onmessage: null, postMessage: null });
        this.port1 = port();
        this.port2 = port();
        this.port1.postMessage = (data) => {
            const target = this.port2;
            if (target.onmessage) queueMicrotask(() => target.onmessage({ data }));
        };
        this.port2.postMessage = (data) => {
            const target = this.port1;
            if (target.onmessage) queueMicrotask(() => target.onmessage({ data }));
        };
    }
};
"#;

const ENCODING_POLYFILLS: &str = r#"
globalThis.TextEncoder = class {
    get encoding() { return 'utf-8'; }
    encode(input = '') {
        const binary = unescape(encodeURIComponent(input));
        const bytes = new Uint8Array(binary.length);
        for (let i = 0; i < binary.length; i++) bytes[i] = binary.charCodeAt(i);
        return bytes;
    }
    encodeInto(input, dest) {
        const bytes = this.encode(input);
        const written = Math.min(bytes.length, dest.length);
        dest.set(bytes.subarray(0, written));
        return { read: input.length, written };
    }
};

globalThis.TextDecoder = class {
    constructor(label = 'utf-8') { this.encoding = label.toLowerCase(); }
    decode(input) {
        if (!input) return '';
        const bytes = input instanceof Uint8Array ? input : new Uint8Array(input);
        let binary = '';
        for (let i = 0; i < bytes.length; i++) binary += String.fromCharCode(bytes[i]);
        return decodeURIComponent(escape(binary));
    }
};
"#;

fn registry_source() -> String {
    let component = CallingConvention::Component.js_tag();
    let render_function = CallingConvention::RenderFunction.js_tag();

    format!(
        r#"
globalThis.{REGISTRY_GLOBAL} = (function () {{
    const components = new Map();
    const storeGenerators = new Map();
    const hydratedStores = new Map();
    let elementRenderer = (output) => String(output);

    const escapeHtml = (text) => String(text)
        .replace(/&/g, '&amp;')
        .replace(/</g, '&lt;')
        .replace(/>/g, '&gt;')
        .replace(/"/g, '&quot;')
        .replace(/'/g, '&#39;');

    const scriptSanitized = (text) => text.replace(/<\/\W*script/gi, '(/script');

    const add = (name, component, convention) => {{
        if (typeof component !== 'function') {{
            throw new Error('Component ' + name + ' must be a function');
        }}
        components.set(name, {{ name, component, convention }});
    }};

    return {{
        register(name, component) {{ add(name, component, '{component}'); }},
        registerRenderFunction(name, fn) {{ add(name, fn, '{render_function}'); }},
        registerStore(name, generator) {{
            if (typeof generator !== 'function') {{
                throw new Error('Store generator ' + name + ' must be a function');
            }}
            storeGenerators.set(name, generator);
        }},
        setElementRenderer(fn) {{ elementRenderer = fn; }},

        componentNames() {{ return Array.from(components.keys()); }},
        get(name) {{
            const entry = components.get(name);
            if (!entry) {{
                throw new Error('Could not find component registered with name ' + name +
                    '. Registered component names include [ ' + Array.from(components.keys()).join(', ') + ' ].');
            }}
            return entry;
        }},

        getStoreGenerator(name) {{
            const generator = storeGenerators.get(name);
            if (!generator) {{
                throw new Error('Could not find store generator registered with name ' + name + '.');
            }}
            return generator;
        }},
        setStore(name, store) {{ hydratedStores.set(name, store); }},
        getStore(name) {{
            if (!hydratedStores.has(name)) {{
                throw new Error('Could not find hydrated store with name ' + name + '.');
            }}
            return hydratedStores.get(name);
        }},
        clearHydratedStores() {{ hydratedStores.clear(); }},

        toHtml(output) {{
            if (typeof output === 'string') return output;
            if (output && typeof output === 'object' &&
                Object.prototype.hasOwnProperty.call(output, 'componentHtml')) {{
                const fragments = {{}};
                for (const key of Object.keys(output)) {{
                    const fragment = output[key];
                    if (typeof fragment !== 'string') {{
                        throw new TypeError('Render function fragment "' + key +
                            '" must be a string, got ' + typeof fragment);
                    }}
                    fragments[key] = fragment;
                }}
                return fragments;
            }}
            return String(elementRenderer(output));
        }},

        describeError(e) {{
            const message = e && e.message !== undefined ? String(e.message) : String(e);
            const stack = e && e.stack ? String(e.stack) : '';
            return {{ message, stack }};
        }},
        errorHtml(name, error) {{
            return '<pre>Exception in rendering ' + escapeHtml(name) + '!\n\n' +
                escapeHtml(error.message) + '\n\n' + escapeHtml(error.stack) + '</pre>';
        }},

        buildConsoleReplay() {{
            const history = globalThis.console.history;
            if (!Array.isArray(history) || history.length === 0) return '';
            const lines = history.map((msg) => {{
                const args = msg.arguments.map((arg) => {{
                    let value;
                    try {{
                        value = typeof arg === 'string' || arg instanceof String
                            ? String(arg)
                            : JSON.stringify(arg);
                        if (value === undefined) value = 'undefined';
                    }} catch (e) {{
                        value = e.message + ': ' + arg;
                    }}
                    return scriptSanitized(value);
                }});
                return 'console.' + msg.level + '.apply(console, ' +
                    JSON.stringify(['[SERVER]'].concat(args)) + ');';
            }});
            return '<script id="consoleReplayLog">\n' + lines.join('\n') + '\n</script>';
        }},
    }};
}})();
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_contains_node_env() {
        let prelude = generate_prelude("production");
        assert!(prelude.contains(r#"NODE_ENV: "production""#));
    }

    #[test]
    fn test_prelude_installs_globals() {
        let prelude = generate_prelude("development");
        assert!(prelude.contains("globalThis.console"));
        assert!(prelude.contains("globalThis.performance"));
        assert!(prelude.contains("globalThis.MessageChannel"));
        assert!(prelude.contains("globalThis.TextEncoder"));
        assert!(prelude.contains("globalThis.SsrRegistry"));
    }

    #[test]
    fn test_prelude_node_env_injection() {
        let prelude = generate_prelude(r#""; alert('xss'); ""#);
        assert!(prelude.contains(r#"NODE_ENV: "\"; alert('xss'); \"""#));
    }

    #[test]
    fn test_registry_uses_convention_tags() {
        let prelude = generate_prelude("production");
        assert!(prelude.contains("add(name, component, 'component')"));
        assert!(prelude.contains("add(name, fn, 'renderFunction')"));
    }

    #[test]
    fn test_calling_convention_tags() {
        assert_eq!(CallingConvention::Component.js_tag(), "component");
        assert_eq!(CallingConvention::RenderFunction.js_tag(), "renderFunction");
    }
}
