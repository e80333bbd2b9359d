use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use ssrkit::{
    BundleResolver, HydrationQueue, ManifestBundle, RenderDefaults, RenderOptionOverrides,
    RenderOptions, RenderPayload, RenderRequest, Renderer, RequestInfo, ResponseScope, SsrPool,
    SsrPoolConfig, StaticBundle,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ssrkit - Server-side render components from a JavaScript bundle
#[derive(Parser, Debug)]
#[command(name = "ssrkit")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a registered component
    Render(RenderArgs),
    /// Evaluate a JavaScript expression
    Eval(EvalArgs),
    /// Check that a context can be built and answers
    Health(PoolArgs),
}

#[derive(Args, Debug)]
struct PoolArgs {
    /// Server bundle, or the dist directory when --manifest-entry is set
    #[arg(long, env = "SSR_BUNDLE")]
    bundle: PathBuf,

    /// Resolve the bundle through <bundle>/manifest.json using this entry
    #[arg(long)]
    manifest_entry: Option<String>,

    /// Number of execution contexts [env: SSR_WORKERS]
    #[arg(long)]
    workers: Option<usize>,

    /// Render timeout in milliseconds [env: SSR_RENDER_TIMEOUT_MS]
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// How long to wait for a free context [env: SSR_ACQUIRE_TIMEOUT_MS]
    #[arg(long)]
    acquire_timeout_ms: Option<u64>,

    /// Rebuild contexts when the bundle changes [env: SSR_CHECK_STALENESS]
    #[arg(long, value_name = "BOOL")]
    check_staleness: Option<bool>,

    /// NODE_ENV exposed to the bundle [env: NODE_ENV]
    #[arg(long)]
    node_env: Option<String>,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[command(flatten)]
    pool: PoolArgs,

    /// Registered component name
    #[arg(long)]
    component: String,

    /// Props as a JSON object or array
    #[arg(long, default_value = "{}")]
    props: String,

    /// Store to hydrate before rendering, as NAME=JSON (repeatable)
    #[arg(long = "store", value_name = "NAME=JSON")]
    stores: Vec<String>,

    /// Request URL exposed through the rails context
    #[arg(long)]
    href: Option<String>,

    /// Locale exposed through the rails context
    #[arg(long)]
    locale: Option<String>,

    /// Fail when the component reports an error
    #[arg(long)]
    raise_on_error: bool,

    /// Let JavaScript exceptions escape the generated script
    #[arg(long)]
    throw_js_errors: bool,

    /// Log the generated script
    #[arg(long)]
    trace: bool,
}

#[derive(Args, Debug)]
struct EvalArgs {
    #[command(flatten)]
    pool: PoolArgs,

    /// Expression to evaluate
    expression: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ssrkit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let output = match cli.command {
        Command::Render(args) => render(args).await?,
        Command::Eval(args) => eval(args).await?,
        Command::Health(args) => health(args).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Pool settings from the environment, overridden by command-line flags.
fn pool_config(args: &PoolArgs) -> Result<SsrPoolConfig> {
    let env = SsrPoolConfig::from_env()?;

    let config = SsrPoolConfig::new(
        args.workers.unwrap_or(env.worker_count),
        args.timeout_ms.unwrap_or(env.render_timeout_ms),
        args.node_env.clone().unwrap_or(env.node_env),
    )?
    .with_acquire_timeout_ms(args.acquire_timeout_ms.or(env.acquire_timeout_ms))
    .with_check_staleness(args.check_staleness.unwrap_or(env.check_staleness));

    Ok(config)
}

/// Initialize the SSR pool for a single command.
fn init_ssr_pool(args: &PoolArgs) -> Result<SsrPool> {
    let resolver: Arc<dyn BundleResolver> = match &args.manifest_entry {
        Some(entry) => Arc::new(ManifestBundle::in_dist_dir(&args.bundle, entry.clone())),
        None => Arc::new(StaticBundle::new(&args.bundle)),
    };

    let pool_config = pool_config(args)?;

    tracing::debug!(
        workers = pool_config.worker_count,
        render_timeout_ms = pool_config.render_timeout_ms,
        bundle = %args.bundle.display(),
        "Initializing SSR pool"
    );

    Ok(SsrPool::new(pool_config, resolver)?)
}

async fn render(args: RenderArgs) -> Result<Value> {
    let pool = init_ssr_pool(&args.pool)?;
    let node_env = pool.config().node_env.clone();
    let renderer = Renderer::new(Arc::new(pool));

    let mut request_info = RequestInfo::new(node_env);
    if let Some(href) = args.href {
        request_info = request_info.with_href(href);
    }
    if let Some(locale) = args.locale {
        request_info = request_info.with_locale(locale);
    }
    let mut scope = ResponseScope::new(request_info);

    for store in &args.stores {
        let (name, props) = store
            .split_once('=')
            .with_context(|| format!("store must be NAME=JSON, got {store}"))?;
        let props: Value = serde_json::from_str(props)
            .with_context(|| format!("invalid JSON for store {name}"))?;
        scope.register_store(name, props, HydrationQueue::Immediate)?;
    }

    let mut overrides = RenderOptionOverrides::new();
    if args.raise_on_error {
        overrides = overrides.with_raise_on_error(true);
    }
    if args.throw_js_errors {
        overrides = overrides.with_throw_js_errors(true);
    }
    if args.trace {
        overrides = overrides.with_trace(true);
    }

    let request = RenderRequest::new(
        args.component,
        Value::String(args.props),
        overrides,
        &RenderDefaults::from_env(),
    )?;

    let result = renderer.render(&mut scope, &request).await?;
    let rails_context_tag = scope.rails_context_script_tag()?;

    let html = match result.payload {
        RenderPayload::StringHtml(html) => Value::String(html),
        RenderPayload::StructuredHtml(fragments) => json!(fragments),
    };

    Ok(json!({
        "domId": request.dom_id(),
        "html": html,
        "consoleReplayScript": result.console_replay_script,
        "hasErrors": result.has_errors,
        "renderingError": result.rendering_error,
        "railsContextTag": rails_context_tag,
    }))
}

async fn eval(args: EvalArgs) -> Result<Value> {
    let pool = init_ssr_pool(&args.pool)?;
    let renderer = Renderer::new(Arc::new(pool));
    let options = RenderOptions::resolve(RenderOptionOverrides::new(), &RenderDefaults::from_env());

    let result = renderer.eval_js(&args.expression, &options).await?;

    Ok(json!({
        "html": result.html,
        "consoleLogScript": result.console_log_script,
        "hasErrors": result.has_errors,
        "renderingError": result.rendering_error,
    }))
}

async fn health(args: PoolArgs) -> Result<Value> {
    let pool = init_ssr_pool(&args)?;
    let status = pool.health_check().await?;

    if !status.healthy {
        tracing::warn!(error = ?status.error, "SSR pool unhealthy");
    }

    Ok(serde_json::to_value(status)?)
}
