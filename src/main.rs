//! # hubcat CLI
//!
//! ```bash
//! hubcat --config ./hubcat.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hubcat serve mcp` | HTTP server with `/tools/*` and the MCP endpoint |
//! | `hubcat serve stdio` | MCP over stdin/stdout |
//! | `hubcat tool list` | Print every tool and its schema |
//! | `hubcat tool call <name> --param k=v` | Run one tool and print its JSON result |
//!
//! ```bash
//! hubcat tool call search --param query=Invoice --param type=API
//! hubcat tool call compare_packages --param 'packages=["SAPS4HANACloud","SAPAriba"]'
//! ```

use clap::{Parser, Subcommand};
use hub_catalog::config::{load_or_default, Config};
use hub_catalog::tools::{call_tool, ToolContext, ToolRegistry};
use hub_catalog::{build_catalog, mcp, server, telemetry};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Query the SAP Business Accelerator Hub catalog from agents and the shell.
#[derive(Parser)]
#[command(name = "hubcat", version)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults apply when it
    /// does not exist.
    #[arg(long, global = true, default_value = "./hubcat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },

    /// List or call tools directly.
    Tool {
        #[command(subcommand)]
        action: ToolAction,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// HTTP server on `[server].bind`, with MCP at `/mcp`.
    Mcp,
    /// MCP over stdin/stdout.
    Stdio,
}

#[derive(Subcommand)]
enum ToolAction {
    /// Print registered tools and their parameter schemas.
    List,

    /// Call a tool and print the JSON result.
    Call {
        name: String,

        /// `KEY=VALUE`. String parameters are passed verbatim; others are
        /// parsed as JSON when they can be.
        #[arg(long = "param", short = 'p', value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// String-typed parameters stay verbatim (so `version=1.0` is not a
/// number); everything else is parsed as JSON when possible.
fn param_value(schema: &serde_json::Value, key: &str, raw: &str) -> serde_json::Value {
    if schema["properties"][key]["type"] == "string" {
        return serde_json::Value::String(raw.to_string());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config: Config = load_or_default(&cli.config)?;
    telemetry::init(&config.logging)?;

    match cli.command {
        Commands::Serve { service } => {
            let catalog = build_catalog(&config)?;
            match service {
                ServeService::Mcp => server::run_server(&config, catalog).await?,
                ServeService::Stdio => mcp::serve_stdio(catalog).await?,
            }
        }
        Commands::Tool { action } => {
            let registry = ToolRegistry::with_builtins();
            match action {
                ToolAction::List => {
                    println!("{}", serde_json::to_string_pretty(&registry.infos())?);
                }
                ToolAction::Call { name, params } => {
                    let schema = registry
                        .find(&name)
                        .map(|t| t.parameters_schema())
                        .unwrap_or_default();
                    let params: serde_json::Map<String, serde_json::Value> = params
                        .into_iter()
                        .map(|(k, v)| {
                            let value = param_value(&schema, &k, &v);
                            (k, value)
                        })
                        .collect();
                    let cancel = CancellationToken::new();
                    let ctrl_c = cancel.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            ctrl_c.cancel();
                        }
                    });
                    let ctx = ToolContext::with_cancel(build_catalog(&config)?, cancel);
                    let result =
                        call_tool(&registry, &name, &serde_json::Value::Object(params), &ctx)
                            .await?;
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
            }
        }
    }

    Ok(())
}
