use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use corral_api::{render_error, ToolOutput, Tools};
use corral_core::{kinds, UiContext};
use corral_kubehub::Credentials;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "corralctl", version, about = "Corral CLI: Kubernetes tools across Rancher-managed clusters")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Rancher server URL
    #[arg(long = "url", env = "CORRAL_URL", global = true, default_value = "")]
    url: String,

    /// Bearer token for the Rancher server
    #[arg(long = "token", env = "CORRAL_TOKEN", global = true, default_value = "", hide_env_values = true)]
    token: String,

    /// Downstream cluster id (default: local)
    #[arg(long = "cluster", global = true, default_value = "")]
    cluster: String,

    /// Namespace (empty: all namespaces or cluster-scoped)
    #[arg(long = "ns", global = true, default_value = "")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the tool catalogue
    Tools,
    /// List the kinds the registry knows
    Kinds,
    /// Invoke a tool with a JSON argument object
    Call {
        /// Tool name, e.g. "inspect_pod"
        tool: String,
        /// Arguments as a JSON object
        #[arg(long = "args", default_value = "{}")]
        args: String,
    },
    /// Get one resource
    Get {
        /// Kind, e.g. "pod" or "Deployment"
        kind: String,
        name: String,
    },
    /// List resources of a kind
    Ls {
        kind: String,
        /// Label selector, e.g. "app=web,tier!=db"
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        /// Print only the count
        #[arg(long = "count", action = ArgAction::SetTrue)]
        count: bool,
    },
}

/// Logs go to stderr so `-o json` output stays machine readable.
fn init_tracing() {
    let filter = std::env::var("CORRAL_LOG")
        .ok()
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

/// Expose the per-tool counters on CORRAL_METRICS_ADDR when it is set.
fn init_metrics() -> Result<()> {
    let Ok(addr) = std::env::var("CORRAL_METRICS_ADDR") else {
        return Ok(());
    };
    let sock: SocketAddr = addr.parse().with_context(|| format!("CORRAL_METRICS_ADDR must be host:port, got {:?}", addr))?;
    PrometheusBuilder::new().with_http_listener(sock).install().context("installing tool metrics exporter")?;
    info!(addr = %sock, "tool metrics exporter listening");
    Ok(())
}

/// Unregistered kinds still resolve (core group, v1); say so before the request goes out.
fn warn_unknown_kind(kind: &str) {
    if !kinds::is_known(kind) {
        let id = kinds::resolve(kind);
        warn!(kind = %kind, resource = %id.resource, "kind not in registry; requesting as {}/{}", id.api_version(), id.resource);
    }
}

/// One human-readable line per object: cluster, kind, key and its dashboard path.
fn human_row(u: &UiContext) -> String {
    let key = if u.namespace.is_empty() { u.name.clone() } else { format!("{}/{}", u.namespace, u.name) };
    let link = kinds::resolve(&u.kind).steve_path(&u.namespace, &u.name);
    format!("{} • {} • {} • {}", u.cluster, u.kind, key, link)
}

fn print_output(out: &ToolOutput, output: Output) -> Result<()> {
    if output == Output::Json {
        println!("{}", out.render()?);
        return Ok(());
    }
    match out {
        ToolOutput::Payload(shaped) if shaped.ui_context.is_empty() => {
            match &shaped.llm {
                Value::String(s) => println!("{}", s),
                other => println!("{}", serde_json::to_string_pretty(other)?),
            }
        }
        ToolOutput::Payload(shaped) => {
            for u in &shaped.ui_context {
                println!("{}", human_row(u));
            }
        }
        ToolOutput::Text(t) => println!("{}", t),
        ToolOutput::Confirmation(c) => {
            println!("{}", c.llm);
            for call in &c.confirmation.tool_calls {
                println!("--- {} ({})", call.name, call.arguments.get("kind").and_then(|k| k.as_str()).unwrap_or(""));
                println!("{}", serde_json::to_string_pretty(&call.arguments)?);
            }
        }
    }
    Ok(())
}

async fn run_tool(tools: &Tools, creds: &Credentials, tool: &str, args: Value, output: Output) -> Result<()> {
    let t0 = Instant::now();
    match tools.call(tool, args, creds).await {
        Ok(out) => {
            info!(tool = %tool, took_ms = %t0.elapsed().as_millis(), "call ok");
            print_output(&out, output)
        }
        Err(e) => {
            error!(tool = %tool, error = %e, "call failed");
            Err(anyhow!(render_error(tool, &e)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics()?;
    let cli = Cli::parse();
    let tools = Tools::default();
    let creds = Credentials::new(cli.token.clone(), cli.url.clone());

    match cli.command {
        Commands::Tools => match cli.output {
            Output::Human => {
                for t in tools.specs() {
                    println!("{:<28} {}", t.name, t.description);
                }
            }
            Output::Json => println!("{}", serde_json::to_string_pretty(tools.specs())?),
        },
        Commands::Kinds => {
            let table = kinds::kinds();
            match cli.output {
                Output::Human => {
                    for k in table {
                        println!("{} • {} • {}", k.api_version(), k.kind, k.resource);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&table)?),
            }
        }
        Commands::Call { tool, args } => {
            let args: Value = serde_json::from_str(&args).with_context(|| format!("--args is not valid JSON: {}", args))?;
            run_tool(&tools, &creds, &tool, args, cli.output).await?;
        }
        Commands::Get { kind, name } => {
            info!(kind = %kind, name = %name, ns = %cli.namespace, "get invoked");
            warn_unknown_kind(&kind);
            let args = json!({"cluster": cli.cluster, "kind": kind, "namespace": cli.namespace, "name": name});
            run_tool(&tools, &creds, "get_kubernetes_resource", args, cli.output).await?;
        }
        Commands::Ls { kind, selector, count } => {
            info!(kind = %kind, ns = %cli.namespace, selector = ?selector, "ls invoked");
            warn_unknown_kind(&kind);
            let args = json!({"cluster": cli.cluster, "kind": kind, "namespace": cli.namespace, "labelSelector": selector});
            if count {
                let out = tools.call("list_kubernetes_resources", args, &creds).await.map_err(|e| anyhow!(render_error("list_kubernetes_resources", &e)))?;
                let n = match &out {
                    ToolOutput::Payload(s) => s.ui_context.len(),
                    _ => 0,
                };
                println!("{}", n);
            } else {
                run_tool(&tools, &creds, "list_kubernetes_resources", args, cli.output).await?;
            }
        }
    }
    Ok(())
}
